//! Live schema introspection through SQLite pragmas.

use std::collections::BTreeMap;

use spire_dbal::dialect::parse_default;
use spire_dbal::{
    AbstractType, Column, Dialect, Driver, ForeignKey, ForeignKeyAction, Index, Result, Row,
    SqlValue, TableState,
};
use tracing::warn;

use crate::driver::SqliteDriver;

pub(crate) const TABLE_NAMES_SQL: &str = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

fn text(row: &Row, column: &str) -> String {
    row.get(column)
        .and_then(SqlValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(SqlValue::as_i64).unwrap_or(0)
}

/// Reads columns, primary key, indexes and foreign keys of `table`.
pub(crate) async fn table_state(driver: &SqliteDriver, table: &str) -> Result<Option<TableState>> {
    if !driver.has_table(table).await? {
        return Ok(None);
    }
    let dialect = driver.dialect();
    let quoted = dialect.identifier(table);
    let mut state = TableState::new(table);

    let columns = driver
        .query(&format!("PRAGMA table_info({quoted})"), &[])
        .await?
        .into_rows();

    let mut primary: Vec<(i64, String)> = columns
        .iter()
        .filter(|row| int(row, "pk") > 0)
        .map(|row| (int(row, "pk"), text(row, "name")))
        .collect();
    primary.sort();
    state.primary_keys = primary.into_iter().map(|(_, name)| name).collect();
    let single_primary = state.primary_keys.len() == 1;

    for row in &columns {
        state.columns.insert(
            text(row, "name"),
            read_column(dialect, row, single_primary),
        );
    }

    state.indexes = read_indexes(driver, &quoted).await?;
    state.foreign_keys = read_foreign_keys(driver, &quoted).await?;
    Ok(Some(state))
}

fn read_column(dialect: &dyn Dialect, row: &Row, single_primary: bool) -> Column {
    let name = text(row, "name");
    let native = text(row, "type");
    let info = dialect.parse_native_type(&native);
    let is_primary = int(row, "pk") > 0;

    let abstract_type = if is_primary && single_primary && info.abstract_type == AbstractType::Integer
    {
        AbstractType::Primary
    } else {
        info.abstract_type
    };

    let mut column = Column::new(name, abstract_type);
    column.native_type = Some(native);
    column.size = info.size.or(column.size);
    column.precision = info.precision;
    column.scale = info.scale;
    column.nullable = !is_primary && int(row, "notnull") == 0;
    if !abstract_type.is_primary() {
        column.default = row
            .get("dflt_value")
            .and_then(SqlValue::as_str)
            .map(|raw| parse_default(raw, abstract_type));
    }
    column
}

/// Explicitly created indexes. Indexes backing primary keys and unique
/// constraints are left out.
async fn read_indexes(driver: &SqliteDriver, quoted: &str) -> Result<Vec<Index>> {
    let list = driver
        .query(&format!("PRAGMA index_list({quoted})"), &[])
        .await?
        .into_rows();

    let mut indexes = Vec::new();
    for row in list.iter().filter(|row| text(row, "origin") == "c") {
        let name = text(row, "name");
        let mut info = driver
            .query(
                &format!("PRAGMA index_info({})", driver.dialect().identifier(&name)),
                &[],
            )
            .await?
            .into_rows();
        info.sort_by_key(|column| int(column, "seqno"));
        let columns: Vec<String> = info.iter().map(|column| text(column, "name")).collect();

        let mut index = Index::new(&columns);
        index.unique(int(row, "unique") == 1).named(name);
        indexes.push(index);
    }
    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}

/// Single column foreign keys. SQLite does not keep constraint names, so
/// the keys come back unnamed and get the generated name.
async fn read_foreign_keys(driver: &SqliteDriver, quoted: &str) -> Result<Vec<ForeignKey>> {
    let rows = driver
        .query(&format!("PRAGMA foreign_key_list({quoted})"), &[])
        .await?
        .into_rows();

    let mut by_id: BTreeMap<i64, Vec<&Row>> = BTreeMap::new();
    for row in &rows {
        by_id.entry(int(row, "id")).or_default().push(row);
    }

    let mut keys = Vec::new();
    for parts in by_id.values() {
        let [row] = parts.as_slice() else {
            warn!(
                table = %quoted,
                columns = parts.len(),
                "Skipping composite foreign key"
            );
            continue;
        };
        let mut fk = ForeignKey::new(text(row, "from"), text(row, "table"), text(row, "to"));
        fk.on_delete(ForeignKeyAction::parse(&text(row, "on_delete")))
            .on_update(ForeignKeyAction::parse(&text(row, "on_update")));
        keys.push(fk);
    }
    Ok(keys)
}

use bidgraph_core::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityHeader};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatatableRow {
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// One optional cell per column, in column order.
    #[serde(default)]
    pub cells: Vec<Option<f64>>,
}

/// Tabular lookup source for list fields and `row:column` contracts.
#[derive(Debug, Clone, PartialEq)]
pub struct Datatable {
    pub header: EntityHeader,
    pub columns: Vec<String>,
    pub rows: Vec<DatatableRow>,
}

impl Datatable {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            header: EntityHeader::new(EntityKind::Datatable, id, title),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, id: &str, label: &str, cells: Vec<Option<f64>>) -> Self {
        self.rows.push(DatatableRow {
            id: id.to_string(),
            label: label.to_string(),
            cells,
        });
        self
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn row(&self, row_id: &str) -> Option<&DatatableRow> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn cell(&self, row_id: &str, column: &str) -> Option<f64> {
        let col = self.column_index(column)?;
        self.row(row_id)?.cells.get(col).copied().flatten()
    }

    /// Resolve a `row:column` address.
    pub fn lookup(&self, address: &str) -> Option<f64> {
        let (row, column) = address.split_once(':')?;
        self.cell(row, column)
    }

    /// Returns whether the stored cell actually changed.
    pub fn set_cell(&mut self, row_id: &str, column: &str, value: Option<f64>) -> bool {
        let Some(col) = self.column_index(column) else {
            return false;
        };
        let Some(row) = self.rows.iter_mut().find(|r| r.id == row_id) else {
            return false;
        };
        if row.cells.len() <= col {
            row.cells.resize(col + 1, None);
        }
        if row.cells[col] == value {
            return false;
        }
        row.cells[col] = value;
        true
    }
}

impl Entity for Datatable {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panels() -> Datatable {
        Datatable::new("panels", "Panels", vec!["watts".into(), "price".into()])
            .with_row("p400", "400W mono", vec![Some(400.0), Some(210.0)])
            .with_row("p450", "450W mono", vec![Some(450.0), None])
    }

    #[test]
    fn lookup_by_row_and_column() {
        let t = panels();
        assert_eq!(t.cell("p400", "price"), Some(210.0));
        assert_eq!(t.lookup("p450:watts"), Some(450.0));
        assert_eq!(t.lookup("p450:price"), None);
        assert_eq!(t.lookup("p999:price"), None);
        assert_eq!(t.lookup("nocolon"), None);
    }

    #[test]
    fn set_cell_reports_change() {
        let mut t = panels();
        assert!(t.set_cell("p450", "price", Some(230.0)));
        assert!(!t.set_cell("p450", "price", Some(230.0)));
        assert!(!t.set_cell("p450", "color", Some(1.0)));
        assert_eq!(t.cell("p450", "price"), Some(230.0));
    }
}

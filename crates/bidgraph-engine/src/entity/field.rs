use bidgraph_core::{DependencyContract, EntityId, EntityKind};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityHeader, Formula};

/// How a field produces its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldConfig {
    /// User-entered number; `auto_populate` fills it while the input is empty.
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_populate: Option<DependencyContract>,
    },
    Toggle,
    /// Picks a row of a datatable; the value is that row's `value_column` cell.
    List {
        datatable_id: EntityId,
        value_column: String,
    },
    Computed {
        formula: Formula,
    },
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig::Number {
            auto_populate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub header: EntityHeader,
    pub config: FieldConfig,
    pub(crate) loaded_config: FieldConfig,
    /// Raw user input; toggles store 1.0 / 0.0.
    pub input: Option<f64>,
    pub selected_row: Option<String>,
    /// Effective value after the last assessment.
    pub value: Option<f64>,
    pub has_null_dependency: bool,
}

impl Field {
    pub fn new(id: impl Into<EntityId>, title: impl Into<String>, config: FieldConfig) -> Self {
        Self {
            header: EntityHeader::new(EntityKind::Field, id, title),
            loaded_config: config.clone(),
            config,
            input: None,
            selected_row: None,
            value: None,
            has_null_dependency: false,
        }
    }

    pub fn number(id: &str, value: Option<f64>) -> Self {
        let mut field = Self::new(id, id, FieldConfig::default());
        field.input = value;
        field.value = value;
        field
    }

    pub fn toggle(id: &str, on: bool) -> Self {
        let mut field = Self::new(id, id, FieldConfig::Toggle);
        let v = if on { 1.0 } else { 0.0 };
        field.input = Some(v);
        field.value = Some(v);
        field
    }

    pub fn list(id: &str, datatable_id: &str, value_column: &str, selected: Option<&str>) -> Self {
        let mut field = Self::new(
            id,
            id,
            FieldConfig::List {
                datatable_id: datatable_id.into(),
                value_column: value_column.to_string(),
            },
        );
        field.selected_row = selected.map(str::to_string);
        field
    }

    pub fn computed(id: &str, formula: Formula) -> Self {
        Self::new(id, id, FieldConfig::Computed { formula })
    }

    pub fn is_toggle(&self) -> bool {
        matches!(self.config, FieldConfig::Toggle)
    }

    pub fn config_changed(&self) -> bool {
        self.config != self.loaded_config
    }
}

impl Entity for Field {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn dependencies(&self) -> Vec<DependencyContract> {
        match &self.config {
            FieldConfig::Number {
                auto_populate: Some(c),
            } => vec![c.clone()],
            FieldConfig::Number { auto_populate: None } | FieldConfig::Toggle => Vec::new(),
            FieldConfig::List {
                datatable_id,
                value_column,
            } => vec![DependencyContract::new(
                EntityKind::Datatable,
                datatable_id.clone(),
                value_column.clone(),
            )],
            FieldConfig::Computed { formula } => formula.contracts().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_field_depends_on_its_datatable() {
        let f = Field::list("panel", "panels", "price", Some("p400"));
        let deps = f.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, EntityKind::Datatable);
        assert_eq!(deps[0].target_id.as_str(), "panels");
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = r#"{"type":"list","datatable_id":"panels","value_column":"price"}"#;
        let cfg: FieldConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(cfg, FieldConfig::List { .. }));
        let number: FieldConfig = serde_json::from_str(r#"{"type":"number"}"#).unwrap();
        assert_eq!(number, FieldConfig::default());
    }
}

//! Edits. Every entry point checks the read-only predicate first, validates,
//! mutates, and queues the assessments the change implies. Nothing runs
//! until the bus is drained.

use bidgraph_core::{
    BidGraphError, DependencyContract, EntityId, EntityKind, EntityRef, Result, StructuralError,
};
use tracing::{debug, info};

use super::Bid;
use crate::entity::{
    BidVariable, Entity, FieldConfig, GroupProp, LineItem, LineItemProp, VariableValue,
};
use crate::redistribute::plan_redistribution;
use crate::snapshot::{LineItemRecord, Record};
use crate::structure::{self, parents_of};

impl Bid {
    fn ensure_editable(&self) -> Result<()> {
        if !self.status.loaded || self.permission.is_read_only(&self.header.id, &self.status) {
            return Err(BidGraphError::PermissionDenied {
                bid: self.header.id.clone(),
            });
        }
        Ok(())
    }

    /// Announce an edited entity and queue its own reassessment ahead of
    /// its listeners.
    fn touch(&mut self, entity: EntityRef) {
        if !matches!(entity.kind, EntityKind::BidVariable | EntityKind::Datatable) {
            self.request_assess(entity.clone());
        }
        self.on_changed(&entity);
    }

    fn line_item_mut(&mut self, id: &EntityId) -> Result<&mut LineItem> {
        self.store
            .line_items
            .get_mut(id)
            .ok_or_else(|| BidGraphError::not_found(EntityKind::LineItem, id))
    }

    pub fn set_line_item_value(&mut self, id: &EntityId, prop: LineItemProp, value: f64) -> Result<()> {
        self.ensure_editable()?;
        let item = self.line_item_mut(id)?;
        item.apply_edit(prop, value)?;
        let entity = item.entity_ref();
        debug!(line_item = %id, prop = prop.as_str(), value, "line item edited");
        self.touch(entity);
        Ok(())
    }

    pub fn set_cost(&mut self, id: &EntityId, value: f64) -> Result<()> {
        self.set_line_item_value(id, LineItemProp::Cost, value)
    }

    pub fn set_price(&mut self, id: &EntityId, value: f64) -> Result<()> {
        self.set_line_item_value(id, LineItemProp::Price, value)
    }

    pub fn set_quantity(&mut self, id: &EntityId, value: f64) -> Result<()> {
        self.set_line_item_value(id, LineItemProp::Quantity, value)
    }

    pub fn set_labor_hours(&mut self, id: &EntityId, value: f64) -> Result<()> {
        self.set_line_item_value(id, LineItemProp::LaborHours, value)
    }

    pub fn set_markup_percent(&mut self, id: &EntityId, value: f64) -> Result<()> {
        self.set_line_item_value(id, LineItemProp::MarkupPercent, value)
    }

    pub fn set_tax_percent(&mut self, id: &EntityId, value: f64) -> Result<()> {
        self.set_line_item_value(id, LineItemProp::TaxPercent, value)
    }

    pub fn set_line_item_included(&mut self, id: &EntityId, included: bool) -> Result<()> {
        self.ensure_editable()?;
        let item = self.line_item_mut(id)?;
        item.set_included(included);
        let entity = item.entity_ref();
        self.touch(entity);
        Ok(())
    }

    /// Release a user override so the property derives again.
    pub fn clear_line_item_override(&mut self, id: &EntityId, prop: LineItemProp) -> Result<bool> {
        self.ensure_editable()?;
        let item = self.line_item_mut(id)?;
        let released = item.clear_override(prop);
        let entity = item.entity_ref();
        if released {
            self.touch(entity);
        }
        Ok(released)
    }

    /// Point a line item input at another entity, or detach it.
    pub fn set_line_item_contract(
        &mut self,
        id: &EntityId,
        prop: LineItemProp,
        contract: Option<DependencyContract>,
    ) -> Result<()> {
        self.ensure_editable()?;
        if !prop.is_input() {
            return Err(BidGraphError::invalid_value(prop.as_str(), "only inputs can be linked"));
        }
        let item = self.line_item_mut(id)?;
        match contract {
            Some(contract) => {
                item.config.contracts.insert(prop, contract);
                item.overrides.release(prop);
            }
            None => {
                item.config.contracts.remove(&prop);
            }
        }
        item.mark_dirty();
        let entity = item.entity_ref();
        self.bind_listeners();
        self.revalidate();
        self.touch(entity);
        Ok(())
    }

    /// Set or clear a number field's input.
    pub fn set_field_value(&mut self, id: &EntityId, value: Option<f64>) -> Result<()> {
        self.ensure_editable()?;
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(BidGraphError::invalid_value(id.as_str(), "value must be a finite number"));
        }
        let field = self
            .store
            .fields
            .get_mut(id)
            .ok_or_else(|| BidGraphError::not_found(EntityKind::Field, id))?;
        if !matches!(field.config, FieldConfig::Number { .. }) {
            return Err(BidGraphError::invalid_value(id.as_str(), "field does not take a number"));
        }
        field.input = value;
        field.mark_dirty();
        let entity = field.entity_ref();
        self.request_assess(entity);
        Ok(())
    }

    pub fn set_field_toggle(&mut self, id: &EntityId, on: bool) -> Result<()> {
        self.ensure_editable()?;
        let field = self
            .store
            .fields
            .get_mut(id)
            .ok_or_else(|| BidGraphError::not_found(EntityKind::Field, id))?;
        if !field.is_toggle() {
            return Err(BidGraphError::invalid_value(id.as_str(), "field is not a toggle"));
        }
        field.input = Some(if on { 1.0 } else { 0.0 });
        field.mark_dirty();
        let entity = field.entity_ref();
        self.request_assess(entity);
        Ok(())
    }

    /// Choose a datatable row for a list field; `None` clears it.
    pub fn select_field_row(&mut self, id: &EntityId, row: Option<&str>) -> Result<()> {
        self.ensure_editable()?;
        let field = self
            .store
            .fields
            .get(id)
            .ok_or_else(|| BidGraphError::not_found(EntityKind::Field, id))?;
        let FieldConfig::List { datatable_id, .. } = &field.config else {
            return Err(BidGraphError::invalid_value(id.as_str(), "field is not a list"));
        };
        if let Some(row) = row {
            let exists = self
                .store
                .datatables
                .get(datatable_id)
                .is_some_and(|t| t.row(row).is_some());
            if !exists {
                return Err(BidGraphError::invalid_value(
                    id.as_str(),
                    format!("{} has no row {}", datatable_id, row),
                ));
            }
        }
        if let Some(field) = self.store.fields.get_mut(id) {
            field.selected_row = row.map(str::to_string);
            field.mark_dirty();
        }
        self.request_assess(EntityRef::new(EntityKind::Field, id.clone()));
        Ok(())
    }

    /// Set a bid variable, creating it when absent.
    pub fn set_variable(&mut self, id: &str, value: VariableValue) -> Result<()> {
        self.ensure_editable()?;
        self.write_variable(id, value)?;
        Ok(())
    }

    /// Returns whether the stored value moved.
    fn write_variable(&mut self, id: &str, value: VariableValue) -> Result<bool> {
        if let VariableValue::Number(n) = value {
            if !n.is_finite() {
                return Err(BidGraphError::invalid_value(id, "value must be a finite number"));
            }
        }
        let key = EntityId::from(id);
        let created = match self.store.variables.get_mut(&key) {
            Some(variable) => {
                if variable.value == value {
                    return Ok(false);
                }
                variable.value = value;
                false
            }
            None => {
                self.store.add_variable(BidVariable::new(key.clone(), id, value))?;
                true
            }
        };
        if created {
            self.bind_listeners();
        }
        debug!(variable = id, ?value, created, "bid variable set");
        self.touch(EntityRef::new(EntityKind::BidVariable, key));
        Ok(true)
    }

    pub fn set_watts(&mut self, watts: f64) -> Result<()> {
        self.ensure_editable()?;
        if watts < 0.0 {
            return Err(BidGraphError::invalid_value("watts", "value must not be negative"));
        }
        if self.write_variable("watts", VariableValue::Number(watts))? {
            // Bid contracts may read watts.
            let bid = self.bid_ref();
            self.on_changed(&bid);
        }
        Ok(())
    }

    pub fn set_datatable_cell(
        &mut self,
        id: &EntityId,
        row: &str,
        column: &str,
        value: Option<f64>,
    ) -> Result<()> {
        self.ensure_editable()?;
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(BidGraphError::invalid_value(column, "value must be a finite number"));
        }
        let table = self
            .store
            .datatables
            .get_mut(id)
            .ok_or_else(|| BidGraphError::not_found(EntityKind::Datatable, id))?;
        if !table.set_cell(row, column, value) {
            return Err(BidGraphError::invalid_value(
                format!("{}:{}", row, column),
                format!("no such cell in {}", id),
            ));
        }
        table.mark_dirty();
        self.touch(EntityRef::new(EntityKind::Datatable, id.clone()));
        Ok(())
    }

    /// Edit a group total by pushing proportional edits into its line items.
    ///
    /// All edits are validated against copies first so a rejected value
    /// leaves every line item untouched.
    pub fn set_group_value(&mut self, group: &EntityRef, prop: GroupProp, value: f64) -> Result<()> {
        self.ensure_editable()?;
        if !matches!(group.kind, EntityKind::Component | EntityKind::DynamicGroup) {
            return Err(BidGraphError::invalid_value(group.to_string(), "not a group"));
        }
        if !self.store.contains(group) {
            return Err(BidGraphError::not_found(group.kind, &group.id));
        }
        let plan = plan_redistribution(&self.store, group, prop, value)?;
        let Some(target) = plan.prop else {
            return Ok(());
        };

        let mut staged: Vec<LineItem> = Vec::with_capacity(plan.edits.len());
        for (id, share) in &plan.edits {
            let mut item = self
                .store
                .line_items
                .get(id)
                .cloned()
                .ok_or_else(|| BidGraphError::not_found(EntityKind::LineItem, id))?;
            if plan.include.contains(id) {
                item.set_included(true);
            }
            item.apply_edit(target, *share)?;
            staged.push(item);
        }

        info!(group = %group, prop = prop.as_str(), value, line_items = staged.len(), "redistributing group edit");
        for item in staged {
            let entity = item.entity_ref();
            self.store.line_items.insert(item.header.id.clone(), item);
            self.touch(entity);
        }
        Ok(())
    }

    /// Attach `child` under `parent`. Returns `false` when already attached.
    pub fn add_child(&mut self, parent: &EntityRef, child: &EntityRef) -> Result<bool> {
        self.ensure_editable()?;
        let added = structure::add_child(&mut self.store, parent, child)?;
        if added {
            self.rewire(parent);
        }
        Ok(added)
    }

    pub fn remove_child(&mut self, parent: &EntityRef, child: &EntityRef) -> Result<bool> {
        self.ensure_editable()?;
        let removed = structure::remove_child(&mut self.store, parent, child)?;
        if removed {
            self.rewire(parent);
        }
        Ok(removed)
    }

    fn rewire(&mut self, group: &EntityRef) {
        if let Some(header) = self.store.header_mut(group) {
            header.dirty = true;
        }
        self.bind_listeners();
        self.request_assess(group.clone());
    }

    /// Add a new line item, optionally under a group.
    pub fn add_line_item(&mut self, record: LineItemRecord, parent: Option<&EntityRef>) -> Result<EntityId> {
        self.ensure_editable()?;
        if let Some(parent) = parent {
            if !self.store.contains(parent) {
                return Err(StructuralError::DanglingReference {
                    kind: parent.kind,
                    id: parent.id.clone(),
                }
                .into());
            }
        }
        let mut item = record.into_entity()?;
        item.mark_dirty();
        let id = item.header.id.clone();
        self.store.add_line_item(item)?;
        let entity = EntityRef::new(EntityKind::LineItem, id.clone());
        if let Some(parent) = parent {
            if let Err(err) = structure::add_child(&mut self.store, parent, &entity) {
                self.store.remove_line_item(&id);
                return Err(err.into());
            }
        }
        self.bind_listeners();
        self.revalidate();
        self.touch(entity);
        info!(line_item = %id, "line item added");
        Ok(id)
    }

    pub fn remove_line_item(&mut self, id: &EntityId) -> Result<()> {
        self.ensure_editable()?;
        let entity = EntityRef::new(EntityKind::LineItem, id.clone());
        let parents = parents_of(&self.store, &entity);
        self.store
            .remove_line_item(id)
            .ok_or_else(|| BidGraphError::not_found(EntityKind::LineItem, id))?;
        self.bus.unsubscribe_requester(&entity);
        self.bind_listeners();
        self.revalidate();
        for parent in parents {
            self.rewire(&parent);
        }
        let bid = self.bid_ref();
        self.request_assess(bid);
        info!(line_item = %id, "line item removed");
        Ok(())
    }

    /// Lock or unlock the bid. Always allowed; unlocking queues a full
    /// assessment.
    pub fn set_locked(&mut self, locked: bool) {
        if self.status.locked == locked {
            return;
        }
        self.status.locked = locked;
        self.header.dirty = true;
        info!(bid = %self.header.id, locked, "bid lock changed");
        if !locked {
            self.request_full_assessment();
        }
    }
}

//! Cart state store.
//!
//! The in-memory list of cart lines shown to the user. Every mutation is
//! applied locally first and returns a [`MutationTicket`]; the caller later
//! reports the server's answer with [`CartStore::confirm`] or
//! [`CartStore::rollback`].
//!
//! While a line has unconfirmed mutations the store remembers its last
//! confirmed state (the baseline). Rolling back the newest mutation of a
//! line restores that baseline; rolling back a superseded one changes
//! nothing visible, since a later absolute update has already replaced it.
//! Reconciliation merges go through [`CartStore::replace_all`], which never
//! resurrects a line whose removal is still in flight.
//!
//! Every mutation, confirmation and rollback advances the store's epoch and
//! stamps the lines it touched. A snapshot fetched after reading
//! [`CartStore::epoch`] cannot overwrite a line stamped later than that read.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;
use thiserror::Error;
use tidecart_core::{CartLine, LineId, total_value};

/// Errors returned by store mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("line {0} is not in the cart")]
    UnknownLine(LineId),

    #[error("quantity for line {0} is out of range")]
    QuantityOutOfRange(LineId),
}

/// Handle to one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationTicket(u64);

/// What a quantity change did to the visible cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    /// The line now has this quantity.
    Updated(u32),
    /// The quantity reached zero and the line was removed.
    Removed,
}

/// An applied optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub ticket: MutationTicket,
    pub change: QuantityChange,
}

/// Unconfirmed mutations of one line.
#[derive(Debug, Clone)]
struct PendingLine {
    /// Last confirmed state; `None` means the line was confirmed absent.
    baseline: Option<CartLine>,
    /// Position of the line when the first pending mutation was applied.
    position: usize,
    /// Tickets in application order with the state each one produced.
    in_flight: Vec<(MutationTicket, Option<CartLine>)>,
}

impl PendingLine {
    fn latest(&self) -> Option<MutationTicket> {
        self.in_flight.last().map(|(ticket, _)| *ticket)
    }
}

/// The client-side cart.
#[derive(Debug, Clone, Default)]
pub struct CartStore {
    lines: Vec<CartLine>,
    pending: HashMap<LineId, PendingLine>,
    next_ticket: u64,
    epoch: u64,
    /// Epoch of the last local change to each line.
    touched: HashMap<LineId, u64>,
}

impl CartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with lines, all considered confirmed.
    #[must_use]
    pub fn with_lines(lines: Vec<CartLine>) -> Self {
        Self {
            lines: lines.into_iter().filter(|l| l.quantity > 0).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Copy of the current lines, for work that must not see later edits.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CartLine> {
        self.lines.clone()
    }

    #[must_use]
    pub fn get(&self, line_id: &LineId) -> Option<&CartLine> {
        self.lines.iter().find(|l| &l.line_id == line_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn total_value(&self) -> Decimal {
        total_value(&self.lines)
    }

    /// Current mutation epoch. Read it before fetching a snapshot and pass
    /// it to [`CartStore::replace_all`].
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a line has mutations awaiting confirmation.
    #[must_use]
    pub fn has_pending(&self, line_id: &LineId) -> bool {
        self.pending.contains_key(line_id)
    }

    /// Change a line's quantity by `delta`. A result of zero or less removes
    /// the line.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownLine` if the line is not in the cart, or
    /// `StoreError::QuantityOutOfRange` if the result does not fit.
    pub fn apply_quantity_delta(
        &mut self,
        line_id: &LineId,
        delta: i64,
    ) -> Result<Applied, StoreError> {
        let current = self
            .get(line_id)
            .ok_or_else(|| StoreError::UnknownLine(line_id.clone()))?
            .quantity;
        let target = i64::from(current).saturating_add(delta);
        if target <= 0 {
            return self.remove(line_id).map(|ticket| Applied {
                ticket,
                change: QuantityChange::Removed,
            });
        }
        let quantity =
            u32::try_from(target).map_err(|_| StoreError::QuantityOutOfRange(line_id.clone()))?;
        self.set_quantity(line_id, quantity)
    }

    /// Set a line's absolute quantity. Zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownLine` if the line is not in the cart.
    pub fn set_quantity(&mut self, line_id: &LineId, quantity: u32) -> Result<Applied, StoreError> {
        if quantity == 0 {
            return self.remove(line_id).map(|ticket| Applied {
                ticket,
                change: QuantityChange::Removed,
            });
        }

        let position = self.position(line_id)?;
        let ticket = self.issue_ticket();
        self.record(position);
        let Some(line) = self.lines.get_mut(position) else {
            return Err(StoreError::UnknownLine(line_id.clone()));
        };
        line.set_quantity(quantity);
        let target = Some(line.clone());
        self.push_target(line_id, ticket, target);

        Ok(Applied {
            ticket,
            change: QuantityChange::Updated(quantity),
        })
    }

    /// Remove a line immediately, before the server confirms.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownLine` if the line is not in the cart.
    pub fn remove(&mut self, line_id: &LineId) -> Result<MutationTicket, StoreError> {
        let position = self.position(line_id)?;
        let ticket = self.issue_ticket();
        self.record(position);
        self.lines.remove(position);
        self.push_target(line_id, ticket, None);
        Ok(ticket)
    }

    /// Empty the cart under a single ticket.
    pub fn clear(&mut self) -> MutationTicket {
        let ticket = self.issue_ticket();
        for position in 0..self.lines.len() {
            self.record(position);
        }
        let ids: Vec<LineId> = self.lines.drain(..).map(|l| l.line_id).collect();
        for line_id in &ids {
            self.push_target(line_id, ticket, None);
        }
        ticket
    }

    /// Drop a line that no longer needs tracking, such as one just
    /// purchased. Any pending mutations of the line are forgotten.
    pub fn discard(&mut self, line_id: &LineId) -> Option<CartLine> {
        self.pending.remove(line_id);
        self.touch(line_id);
        let position = self.position(line_id).ok()?;
        Some(self.lines.remove(position))
    }

    /// The server acknowledged the mutation behind `ticket`.
    pub fn confirm(&mut self, ticket: MutationTicket) {
        let mut settled = Vec::new();
        self.pending.retain(|line_id, pending| {
            let Some(index) = pending.in_flight.iter().position(|(t, _)| *t == ticket) else {
                return true;
            };
            let (_, target) = pending.in_flight.remove(index);
            pending.baseline = target;
            settled.push(line_id.clone());
            !pending.in_flight.is_empty()
        });
        for line_id in &settled {
            self.touch(line_id);
        }
    }

    /// The server rejected or never acknowledged the mutation behind
    /// `ticket`. Returns whether the visible cart changed.
    pub fn rollback(&mut self, ticket: MutationTicket) -> bool {
        let affected: Vec<LineId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.in_flight.iter().any(|(t, _)| *t == ticket))
            .map(|(id, _)| id.clone())
            .collect();

        let mut restored = Vec::new();
        for line_id in affected {
            let Some(pending) = self.pending.get_mut(&line_id) else {
                continue;
            };
            if pending.latest() == Some(ticket) {
                if let Some(pending) = self.pending.remove(&line_id) {
                    restored.push((line_id, pending));
                }
            } else {
                pending.in_flight.retain(|(t, _)| *t != ticket);
            }
        }

        // Reinsert in original order so a rolled-back clear keeps the layout.
        restored.sort_by_key(|(_, pending)| pending.position);
        let changed = !restored.is_empty();
        for (line_id, pending) in restored {
            self.touch(&line_id);
            let current = self.position(&line_id).ok();
            match (current, pending.baseline) {
                (Some(index), Some(line)) => {
                    if let Some(slot) = self.lines.get_mut(index) {
                        *slot = line;
                    }
                }
                (Some(index), None) => {
                    self.lines.remove(index);
                }
                (None, Some(line)) => {
                    let index = pending.position.min(self.lines.len());
                    self.lines.insert(index, line);
                }
                (None, None) => {}
            }
        }
        changed
    }

    /// Merge a server snapshot requested at epoch `since`.
    ///
    /// Lines are taken from the server in server order, except that a line
    /// with unconfirmed local mutations, or one changed locally after
    /// `since`, keeps its local quantity (or stays removed). Local lines
    /// missing from the snapshot are dropped.
    pub fn replace_all(&mut self, server_lines: Vec<CartLine>, since: u64) {
        let mut merged = Vec::with_capacity(server_lines.len());

        for server_line in server_lines {
            if server_line.quantity == 0 {
                continue;
            }
            let local = self
                .lines
                .iter()
                .find(|l| l.line_id == server_line.line_id)
                .map(|l| l.quantity);

            if let Some(pending) = self.pending.get_mut(&server_line.line_id) {
                pending.baseline = Some(server_line.clone());
            } else if self
                .touched
                .get(&server_line.line_id)
                .is_none_or(|epoch| *epoch <= since)
            {
                merged.push(server_line);
                continue;
            }

            if let Some(quantity) = local {
                let mut line = server_line;
                line.set_quantity(quantity);
                merged.push(line);
            }
        }

        let present: HashSet<&LineId> =
            merged.iter().map(|l| &l.line_id).collect();
        self.pending.retain(|line_id, pending| {
            present.contains(line_id)
                || pending.in_flight.last().is_some_and(|(_, target)| target.is_none())
        });
        self.touched.retain(|_, epoch| *epoch > since);
        self.lines = merged;
    }

    fn position(&self, line_id: &LineId) -> Result<usize, StoreError> {
        self.lines
            .iter()
            .position(|l| &l.line_id == line_id)
            .ok_or_else(|| StoreError::UnknownLine(line_id.clone()))
    }

    fn issue_ticket(&mut self) -> MutationTicket {
        self.next_ticket += 1;
        MutationTicket(self.next_ticket)
    }

    fn touch(&mut self, line_id: &LineId) {
        self.epoch += 1;
        self.touched.insert(line_id.clone(), self.epoch);
    }

    /// Open a pending record for the line at `position` if it has none yet,
    /// and stamp it with a new epoch.
    fn record(&mut self, position: usize) {
        let Some(line) = self.lines.get(position) else {
            return;
        };
        let line_id = line.line_id.clone();
        self.pending
            .entry(line_id.clone())
            .or_insert_with(|| PendingLine {
                baseline: Some(line.clone()),
                position,
                in_flight: Vec::new(),
            });
        self.touch(&line_id);
    }

    fn push_target(&mut self, line_id: &LineId, ticket: MutationTicket, target: Option<CartLine>) {
        if let Some(pending) = self.pending.get_mut(line_id) {
            pending.in_flight.push((ticket, target));
        }
    }
}

/// A [`CartStore`] shared between the controller and background work.
///
/// The lock is only ever held for synchronous store calls, never across an
/// await.
#[derive(Debug, Clone, Default)]
pub struct SharedCart(Arc<Mutex<CartStore>>);

impl SharedCart {
    #[must_use]
    pub fn new(store: CartStore) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    /// Run `f` with exclusive access to the store.
    pub fn with<R>(&self, f: impl FnOnce(&mut CartStore) -> R) -> R {
        let mut store = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<CartLine> {
        self.with(|store| store.snapshot())
    }

    #[must_use]
    pub fn total_value(&self) -> Decimal {
        self.with(|store| store.total_value())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tidecart_core::ProductId;

    use super::*;

    fn line(id: i64, quantity: u32, cents: i64) -> CartLine {
        CartLine::new(
            LineId::from(id),
            Some(ProductId::new(id * 10)),
            format!("Produto {id}"),
            quantity,
            Decimal::new(cents, 2),
        )
    }

    fn store() -> CartStore {
        CartStore::with_lines(vec![line(1, 2, 5000), line(2, 1, 1990), line(3, 4, 250)])
    }

    fn assert_totals_consistent(store: &CartStore) {
        for l in store.lines() {
            assert!(l.quantity > 0);
            assert_eq!(l.line_total, l.unit_price * Decimal::from(l.quantity));
        }
    }

    #[test]
    fn test_quantity_invariant_holds_for_delta_sequences() {
        let mut store = store();
        let id = LineId::from(1);
        for delta in [3, -1, 7, -4, 1, -2, 10, -13] {
            if store.get(&id).is_none() {
                break;
            }
            store.apply_quantity_delta(&id, delta).unwrap();
            assert_totals_consistent(&store);
        }
        assert_totals_consistent(&store);
    }

    #[test]
    fn test_delta_to_zero_removes_line() {
        let mut store = store();
        let id = LineId::from(3);
        let applied = store.apply_quantity_delta(&id, -4).unwrap();
        assert_eq!(applied.change, QuantityChange::Removed);
        assert!(store.get(&id).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_delta_below_zero_removes_line() {
        let mut store = store();
        let id = LineId::from(2);
        store.apply_quantity_delta(&id, -50).unwrap();
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn test_unknown_line() {
        let mut store = store();
        assert_eq!(
            store.apply_quantity_delta(&LineId::from(99), 1),
            Err(StoreError::UnknownLine(LineId::from(99)))
        );
        assert!(store.remove(&LineId::from(99)).is_err());
    }

    #[test]
    fn test_total_value() {
        let store = store();
        assert_eq!(store.total_value(), Decimal::new(12990, 2));
        assert_eq!(CartStore::new().total_value(), Decimal::ZERO);
    }

    #[test]
    fn test_update_uses_unit_price_not_server_total() {
        let mut stale = line(1, 2, 5000);
        stale.line_total = Decimal::new(1, 0);
        let mut store = CartStore::with_lines(vec![stale]);
        store.apply_quantity_delta(&LineId::from(1), 1).unwrap();
        assert_eq!(
            store.get(&LineId::from(1)).unwrap().line_total,
            Decimal::new(15000, 2)
        );
    }

    #[test]
    fn test_rollback_restores_quantity() {
        let mut store = store();
        let id = LineId::from(1);
        let applied = store.apply_quantity_delta(&id, 3).unwrap();
        assert_eq!(store.get(&id).unwrap().quantity, 5);

        assert!(store.rollback(applied.ticket));
        let restored = store.get(&id).unwrap();
        assert_eq!(restored.quantity, 2);
        assert_eq!(restored.line_total, Decimal::new(10000, 2));
        assert!(!store.has_pending(&id));
    }

    #[test]
    fn test_rollback_restores_removed_line_in_place() {
        let mut store = store();
        let ticket = store.remove(&LineId::from(2)).unwrap();
        assert!(store.rollback(ticket));
        let ids: Vec<_> = store.lines().iter().map(|l| l.line_id.clone()).collect();
        assert_eq!(ids, vec![LineId::from(1), LineId::from(2), LineId::from(3)]);
    }

    #[test]
    fn test_rollback_restores_cleared_cart() {
        let mut store = store();
        let before = store.snapshot();
        let ticket = store.clear();
        assert!(store.is_empty());
        assert!(store.rollback(ticket));
        assert_eq!(store.lines(), before.as_slice());
    }

    #[test]
    fn test_confirm_forgets_pending() {
        let mut store = store();
        let id = LineId::from(1);
        let applied = store.apply_quantity_delta(&id, 1).unwrap();
        assert!(store.has_pending(&id));
        store.confirm(applied.ticket);
        assert!(!store.has_pending(&id));
        assert!(!store.rollback(applied.ticket));
        assert_eq!(store.get(&id).unwrap().quantity, 3);
    }

    #[test]
    fn test_superseded_rollback_is_invisible() {
        let mut store = store();
        let id = LineId::from(1);
        let first = store.apply_quantity_delta(&id, 1).unwrap();
        let second = store.apply_quantity_delta(&id, 1).unwrap();

        assert!(!store.rollback(first.ticket));
        assert_eq!(store.get(&id).unwrap().quantity, 4);

        assert!(store.rollback(second.ticket));
        assert_eq!(store.get(&id).unwrap().quantity, 2);
    }

    #[test]
    fn test_rollback_after_earlier_confirm_uses_confirmed_state() {
        let mut store = store();
        let id = LineId::from(1);
        let first = store.apply_quantity_delta(&id, 1).unwrap();
        let second = store.apply_quantity_delta(&id, 1).unwrap();
        store.confirm(first.ticket);
        store.rollback(second.ticket);
        assert_eq!(store.get(&id).unwrap().quantity, 3);
    }

    #[test]
    fn test_replace_all_takes_server_state() {
        let mut store = store();
        let since = store.epoch();
        store.replace_all(vec![line(2, 5, 1990), line(4, 1, 100)], since);
        let ids: Vec<_> = store.lines().iter().map(|l| l.line_id.clone()).collect();
        assert_eq!(ids, vec![LineId::from(2), LineId::from(4)]);
        assert_eq!(store.get(&LineId::from(2)).unwrap().quantity, 5);
    }

    #[test]
    fn test_replace_all_does_not_resurrect_in_flight_removal() {
        let mut store = store();
        let ticket = store.remove(&LineId::from(1)).unwrap();
        let since = store.epoch();
        store.replace_all(vec![line(1, 2, 5000), line(2, 1, 1990), line(3, 4, 250)], since);
        assert!(store.get(&LineId::from(1)).is_none());

        store.rollback(ticket);
        assert_eq!(store.get(&LineId::from(1)).unwrap().quantity, 2);
    }

    #[test]
    fn test_replace_all_keeps_in_flight_quantity_with_server_price() {
        let mut store = store();
        let id = LineId::from(1);
        store.apply_quantity_delta(&id, 2).unwrap();
        let since = store.epoch();
        store.replace_all(vec![line(1, 2, 6000)], since);
        let merged = store.get(&id).unwrap();
        assert_eq!(merged.quantity, 4);
        assert_eq!(merged.line_total, Decimal::new(24000, 2));
    }

    #[test]
    fn test_replace_all_drops_lines_gone_from_server() {
        let mut store = store();
        store.apply_quantity_delta(&LineId::from(1), 1).unwrap();
        let since = store.epoch();
        store.replace_all(vec![line(2, 1, 1990)], since);
        assert!(store.get(&LineId::from(1)).is_none());
        assert!(!store.has_pending(&LineId::from(1)));
    }

    #[test]
    fn test_stale_snapshot_does_not_undo_confirmed_removal() {
        let mut store = CartStore::with_lines(vec![line(1, 2, 5000), line(2, 1, 1990)]);
        let since = store.epoch();
        let stale = store.snapshot();

        let ticket = store.remove(&LineId::from(1)).unwrap();
        store.confirm(ticket);
        store.replace_all(stale, since);

        assert!(store.get(&LineId::from(1)).is_none());
        assert_eq!(store.get(&LineId::from(2)).unwrap().quantity, 1);
    }

    #[test]
    fn test_stale_snapshot_does_not_undo_confirmed_quantity() {
        let mut store = CartStore::with_lines(vec![line(1, 2, 5000), line(2, 1, 1990)]);
        let since = store.epoch();
        let stale = store.snapshot();

        let applied = store.set_quantity(&LineId::from(2), 6).unwrap();
        store.confirm(applied.ticket);
        store.replace_all(stale, since);

        let kept = store.get(&LineId::from(2)).unwrap();
        assert_eq!(kept.quantity, 6);
        assert_eq!(kept.line_total, Decimal::new(11940, 2));
        assert_totals_consistent(&store);
    }

    #[test]
    fn test_mutation_confirmed_after_fetch_started_is_kept() {
        let mut store = store();
        let applied = store.set_quantity(&LineId::from(3), 1).unwrap();
        let since = store.epoch();
        let stale = vec![line(1, 2, 5000), line(2, 1, 1990), line(3, 4, 250)];

        store.confirm(applied.ticket);
        store.replace_all(stale, since);

        assert_eq!(store.get(&LineId::from(3)).unwrap().quantity, 1);
    }

    #[test]
    fn test_fresh_snapshot_after_confirm_wins() {
        let mut store = store();
        let applied = store.set_quantity(&LineId::from(1), 5).unwrap();
        store.confirm(applied.ticket);

        let since = store.epoch();
        store.replace_all(vec![line(1, 3, 5000)], since);

        assert_eq!(store.get(&LineId::from(1)).unwrap().quantity, 3);
    }

    #[test]
    fn test_epoch_advances_on_every_change() {
        let mut store = store();
        let start = store.epoch();
        let applied = store.set_quantity(&LineId::from(1), 5).unwrap();
        let after_apply = store.epoch();
        store.confirm(applied.ticket);

        assert!(after_apply > start);
        assert!(store.epoch() > after_apply);
    }

    #[test]
    fn test_discard() {
        let mut store = store();
        store.apply_quantity_delta(&LineId::from(3), 1).unwrap();
        let gone = store.discard(&LineId::from(3)).unwrap();
        assert_eq!(gone.quantity, 5);
        assert!(!store.has_pending(&LineId::from(3)));
        assert!(store.discard(&LineId::from(3)).is_none());
    }
}

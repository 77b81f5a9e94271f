//! Day-bucketed window of a conversation's messages.
//!
//! The window is the only place message rows live while a conversation is
//! open. It guarantees that a message id is resident at most once, that no
//! two sections share a day and that sections are never left empty.

use crate::types::message::{Message, MessageId, MessageRow, ReceiptState};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("message {message_id} has no timestamp and cannot be bucketed")]
    MalformedRow { message_id: MessageId },
}

/// Edge of the window a batch is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Top,
    Bottom,
}

/// All rows that share one calendar day (UTC).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSection {
    day: NaiveDate,
    rows: Vec<MessageRow>,
}

impl MessageSection {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            rows: Vec::new(),
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Millisecond timestamp of the section's midnight.
    pub fn section_id(&self) -> i64 {
        self.day
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default()
    }

    pub fn rows(&self) -> &[MessageRow] {
        &self.rows
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.rows.iter().map(MessageRow::id).collect()
    }

    fn position_for(&self, time: DateTime<Utc>, edge: Edge) -> usize {
        match edge {
            Edge::Top => self
                .rows
                .partition_point(|r| r.time().is_some_and(|t| t < time)),
            Edge::Bottom => self
                .rows
                .partition_point(|r| r.time().is_some_and(|t| t <= time)),
        }
    }
}

/// Where a single inserted row ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPlacement {
    Inserted,
    Replaced,
}

/// Summary of one batch insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub replaced: usize,
    pub rejected: Vec<WindowError>,
}

impl InsertReport {
    pub fn applied(&self) -> usize {
        self.inserted + self.replaced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The target was already in the window; only the highlight moved.
    Resident,
    /// The window was replaced by the fresh page, which holds the target.
    Replaced,
    /// The window was replaced but the fresh page lacks the target.
    NotFound,
}

#[derive(Debug, Default)]
pub struct MessageWindow {
    sections: BTreeMap<NaiveDate, MessageSection>,
    index: HashMap<MessageId, NaiveDate>,
    highlighted: Option<MessageId>,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&MessageRow> {
        let day = self.index.get(&id)?;
        self.sections
            .get(day)?
            .rows
            .iter()
            .find(|row| row.id() == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut MessageRow> {
        let day = self.index.get(&id)?;
        self.sections
            .get_mut(day)?
            .rows
            .iter_mut()
            .find(|row| row.id() == id)
    }

    /// Sections in display order, oldest day first.
    pub fn sections(&self) -> impl Iterator<Item = &MessageSection> {
        self.sections.values()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Oldest resident message, the anchor for loading more at the top.
    pub fn first_message(&self) -> Option<&MessageRow> {
        self.sections.values().next()?.rows.first()
    }

    /// Newest resident message, the anchor for loading more at the bottom.
    pub fn last_message(&self) -> Option<&MessageRow> {
        self.sections.values().next_back()?.rows.last()
    }

    pub fn highlighted(&self) -> Option<MessageId> {
        self.highlighted
    }

    pub fn insert(
        &mut self,
        rows: impl IntoIterator<Item = MessageRow>,
        edge: Edge,
    ) -> InsertReport {
        let mut report = InsertReport::default();
        for row in rows {
            match self.insert_row(row, edge) {
                Ok(RowPlacement::Inserted) => report.inserted += 1,
                Ok(RowPlacement::Replaced) => report.replaced += 1,
                Err(err) => {
                    warn!(target: "Window", "Dropping row: {err}");
                    report.rejected.push(err);
                }
            }
        }
        debug!(
            target: "Window",
            "Inserted {} / replaced {} / rejected {} rows at {:?} edge",
            report.inserted,
            report.replaced,
            report.rejected.len(),
            edge
        );
        report
    }

    pub fn insert_row(
        &mut self,
        row: MessageRow,
        edge: Edge,
    ) -> Result<RowPlacement, WindowError> {
        let id = row.id();
        let time = row
            .time()
            .ok_or(WindowError::MalformedRow { message_id: id })?;

        if let Some(resident) = self.get_mut(id) {
            resident.refresh(row.into_message());
            return Ok(RowPlacement::Replaced);
        }

        let day = time.date_naive();
        let section = self
            .sections
            .entry(day)
            .or_insert_with(|| MessageSection::new(day));
        let at = section.position_for(time, edge);
        section.rows.insert(at, row);
        self.index.insert(id, day);
        Ok(RowPlacement::Inserted)
    }

    /// Removes a message, dropping its section if it was the last row.
    pub fn remove(&mut self, id: MessageId) -> Option<MessageRow> {
        let day = self.index.remove(&id)?;
        let section = self.sections.get_mut(&day)?;
        let pos = section.rows.iter().position(|row| row.id() == id)?;
        let row = section.rows.remove(pos);
        if section.rows.is_empty() {
            self.sections.remove(&day);
        }
        if self.highlighted == Some(id) {
            self.highlighted = None;
        }
        Some(row)
    }

    /// Applies a seen/delivered receipt to a resident message.
    /// Returns false if the message is absent or already further along.
    pub fn update_receipt(&mut self, id: MessageId, receipt: ReceiptState) -> bool {
        self.get_mut(id)
            .map(|row| row.apply_receipt(receipt))
            .unwrap_or(false)
    }

    /// Moves the jump highlight to `id` if it is resident.
    pub fn highlight(&mut self, id: MessageId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.clear_highlight();
        if let Some(row) = self.get_mut(id) {
            row.set_highlighted(true);
        }
        self.highlighted = Some(id);
        true
    }

    pub fn clear_highlight(&mut self) {
        if let Some(prev) = self.highlighted.take()
            && let Some(row) = self.get_mut(prev)
        {
            row.set_highlighted(false);
        }
    }

    /// Deep-link reconciliation around `around`.
    ///
    /// A resident target is only highlighted and the page is ignored.
    /// Otherwise the window is replaced by `fresh_page`, which is expected
    /// to be centered on the target.
    pub fn reconcile(
        &mut self,
        around: MessageId,
        fresh_page: impl IntoIterator<Item = MessageRow>,
    ) -> (ReconcileOutcome, InsertReport) {
        if self.highlight(around) {
            return (ReconcileOutcome::Resident, InsertReport::default());
        }
        self.clear();
        let report = self.insert(fresh_page, Edge::Bottom);
        if self.highlight(around) {
            (ReconcileOutcome::Replaced, report)
        } else {
            warn!(target: "Window", "Jump target {around} missing from the fetched page");
            (ReconcileOutcome::NotFound, report)
        }
    }

    pub fn clear(&mut self) {
        self.sections.clear();
        self.index.clear();
        self.highlighted = None;
    }

    /// Cloned display snapshot.
    pub fn snapshot(&self) -> Vec<MessageSection> {
        self.sections.values().cloned().collect()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.sections
            .values()
            .flat_map(|s| s.rows.iter().map(MessageRow::message))
    }
}

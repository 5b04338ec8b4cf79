//! The retry queue: ordered action records awaiting execution.
//!
//! Order is dispatch order. The only exception to plain FIFO is
//! [`RetryQueue::requeue_front`], used when a dispatch failed because the
//! transport went away; the record goes back to the head so nothing queued
//! behind it can overtake it.

use std::collections::VecDeque;

use crate::{ActionId, ActionRecord};

/// FIFO of [`ActionRecord`]s with de-duplication by [`ActionId`].
#[derive(Debug, Default)]
pub struct RetryQueue {
    records: VecDeque<ActionRecord>,
}

impl RetryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` unless a record with the same id is already queued.
    ///
    /// Returns the record back on rejection so the caller decides what to do
    /// with its continuation.
    pub fn enqueue(&mut self, record: ActionRecord) -> Result<(), ActionRecord> {
        if self.contains(record.id()) {
            return Err(record);
        }
        self.records.push_back(record);
        Ok(())
    }

    /// Puts `record` back at the head of the queue.
    pub fn requeue_front(&mut self, record: ActionRecord) {
        self.records.push_front(record);
    }

    /// Removes and returns the head of the queue.
    pub fn dequeue_front(&mut self) -> Option<ActionRecord> {
        self.records.pop_front()
    }

    /// Removes the record with the given id, if queued.
    pub fn remove(&mut self, id: &ActionId) -> Option<ActionRecord> {
        let index = self.records.iter().position(|r| r.id() == id)?;
        self.records.remove(index)
    }

    /// Removes every record, head first.
    pub fn drain_all(&mut self) -> Vec<ActionRecord> {
        self.records.drain(..).collect()
    }

    /// Returns `true` if a record with the given id is queued.
    pub fn contains(&self, id: &ActionId) -> bool {
        self.records.iter().any(|r| r.id() == id)
    }

    /// Ids of the queued records in dispatch order.
    pub fn ids(&self) -> Vec<ActionId> {
        self.records.iter().map(|r| r.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::data_point::DataPoint;

/// Data points waiting for the next flush of one destination.
#[derive(Debug)]
pub struct BatchBuffer {
    points: Vec<DataPoint>,
    max: usize,
}

impl BatchBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            points: Vec::with_capacity(max.min(DEFAULT_BUFFER_SIZE)),
            max,
        }
    }

    /// A full buffer must be flushed before the next point is appended.
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.max
    }

    pub fn push(&mut self, point: DataPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// The buffered points as a JSON array, `[]` when empty.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.points)
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

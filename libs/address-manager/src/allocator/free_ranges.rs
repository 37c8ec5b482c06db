// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Free address bookkeeping as sorted, disjoint half-open spans.

use std::cmp::Ordering;

/// Half-open span `[start, end)` of free address values.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub(crate) struct Span {
    pub(crate) start: u128,
    pub(crate) end: u128,
}

impl Span {
    fn len(&self) -> u128 {
        self.end - self.start
    }

    /// Orders the span relative to `value`, `Equal` if the span contains it.
    fn locate(&self, value: u128) -> Ordering {
        if value < self.start {
            Ordering::Greater
        } else if value >= self.end {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

/// The value is not free.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NotFree(pub(crate) u128);

/// The value is already free.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct AlreadyFree(pub(crate) u128);

/// Set of free values. Invariant: spans are non-empty, sorted by start, and neither
/// overlapping nor adjacent.
#[derive(Debug, Eq, PartialEq, Clone)]
pub(crate) struct FreeRanges {
    spans: Vec<Span>,
}

impl FreeRanges {
    /// All `count` values starting at `start` are free.
    pub(crate) fn full(start: u128, count: u128) -> Self {
        let spans = match count {
            0 => Vec::new(),
            n => vec![Span { start, end: start + n }],
        };
        Self { spans }
    }

    pub(crate) fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub(crate) fn len(&self) -> u128 {
        self.spans.iter().map(Span::len).sum()
    }

    pub(crate) fn contains(&self, value: u128) -> bool {
        self.spans.binary_search_by(|s| s.locate(value)).is_ok()
    }

    /// Marks `value` as in use.
    pub(crate) fn take(&mut self, value: u128) -> Result<(), NotFree> {
        let i = self
            .spans
            .binary_search_by(|s| s.locate(value))
            .map_err(|_| NotFree(value))?;

        let span = self.spans[i];
        match (span.start == value, span.end == value + 1) {
            (true, true) => {
                self.spans.remove(i);
            }
            (true, false) => self.spans[i].start = value + 1,
            (false, true) => self.spans[i].end = value,
            (false, false) => {
                self.spans[i].end = value;
                self.spans.insert(
                    i + 1,
                    Span {
                        start: value + 1,
                        end: span.end,
                    },
                );
            }
        }
        Ok(())
    }

    /// Marks `value` as free again.
    pub(crate) fn put(&mut self, value: u128) -> Result<(), AlreadyFree> {
        let i = match self.spans.binary_search_by(|s| s.locate(value)) {
            Ok(_) => return Err(AlreadyFree(value)),
            Err(i) => i,
        };

        let joins_left = i > 0 && self.spans[i - 1].end == value;
        let joins_right = i < self.spans.len() && self.spans[i].start == value + 1;
        match (joins_left, joins_right) {
            (true, true) => {
                self.spans[i - 1].end = self.spans[i].end;
                self.spans.remove(i);
            }
            (true, false) => self.spans[i - 1].end = value + 1,
            (false, true) => self.spans[i].start = value,
            (false, false) => {
                self.spans.insert(
                    i,
                    Span {
                        start: value,
                        end: value + 1,
                    },
                )
            }
        }
        Ok(())
    }

    /// The `n`th free value in ascending order.
    pub(crate) fn nth(&self, mut n: u128) -> Option<u128> {
        for span in &self.spans {
            if n < span.len() {
                return Some(span.start + n);
            }
            n -= span.len();
        }
        None
    }
}

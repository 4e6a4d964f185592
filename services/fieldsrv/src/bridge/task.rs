//! Tasks: scheduled register-range transactions
//!
//! A task describes one read or write transaction against a device: start
//! register, declared register count, priority, and the ordered elements
//! that slice the range into typed fields. The element lengths must cover
//! the declared count exactly; mismatches are configuration errors at
//! construction time, never decode-time surprises.

use serde::{Deserialize, Serialize};

use super::element::Element;
use crate::error::{FieldSrvError, Result};

/// Task scheduling priority
///
/// HIGH tasks run every cycle; LOW tasks run round-robin under the
/// per-device budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Low,
}

/// Transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
}

/// One register-range transaction description
#[derive(Debug, Clone)]
pub struct Task {
    start: u16,
    register_count: u16,
    direction: Direction,
    priority: Priority,
    elements: Vec<Element>,
}

impl Task {
    /// Build a read task
    pub fn read(start: u16, register_count: u16, priority: Priority, elements: Vec<Element>) -> Result<Self> {
        Self::build(start, register_count, Direction::Read, priority, elements)
    }

    /// Build a write task
    ///
    /// Bit-packed elements are read-only: writing part of a packed word
    /// would require read-modify-write, which the bridge does not do.
    pub fn write(start: u16, register_count: u16, elements: Vec<Element>) -> Result<Self> {
        if let Some(e) = elements.iter().find(|e| e.is_bits()) {
            return Err(FieldSrvError::config(format!(
                "Write task at {start}: bit element spanning {} registers is not writable",
                e.register_count()
            )));
        }
        Self::build(start, register_count, Direction::Write, Priority::High, elements)
    }

    fn build(
        start: u16,
        register_count: u16,
        direction: Direction,
        priority: Priority,
        elements: Vec<Element>,
    ) -> Result<Self> {
        if register_count == 0 {
            return Err(FieldSrvError::config(format!(
                "Task at {start}: empty register range"
            )));
        }
        let covered: u32 = elements.iter().map(|e| u32::from(e.register_count())).sum();
        if covered != u32::from(register_count) {
            return Err(FieldSrvError::config(format!(
                "Task at {start}: elements cover {covered} registers, task declares {register_count}"
            )));
        }
        if u32::from(start) + u32::from(register_count) > u32::from(u16::MAX) + 1 {
            return Err(FieldSrvError::config(format!(
                "Task at {start}: range of {register_count} registers exceeds address space"
            )));
        }
        Ok(Self {
            start,
            register_count,
            direction,
            priority,
            elements,
        })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    /// One past the last register of this task
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.register_count)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Elements with their register offsets from the task start
    pub fn element_spans(&self) -> impl Iterator<Item = (u16, &Element)> {
        self.elements.iter().scan(0u16, |offset, element| {
            let at = *offset;
            *offset += element.register_count();
            Some((at, element))
        })
    }

    /// Decode a full response for this task's range into channel `next` values
    pub fn decode_response(&self, words: &[u16]) -> Result<()> {
        debug_assert_eq!(words.len(), usize::from(self.register_count));
        for (offset, element) in self.element_spans() {
            let from = usize::from(offset);
            let to = from + usize::from(element.register_count());
            element.decode(&words[from..to])?;
        }
        Ok(())
    }

    /// Drive every bound channel of this task to undefined
    pub fn invalidate(&self) {
        for element in &self.elements {
            element.invalidate();
        }
    }
}

// ============================================================================
// Read request planning
// ============================================================================

/// A merged contiguous-range bus request covering one or more tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub start: u16,
    pub count: u16,
    /// Indices into the device's read task list
    pub tasks: Vec<usize>,
}

/// Merge selected read tasks into the minimum number of bus requests
///
/// Tasks whose register gap is at most `merge_gap` are combined, as long as
/// the merged span stays within `max_registers`. Requests come out sorted
/// by start address.
pub fn plan_read_requests(
    tasks: &[Task],
    selected: &[usize],
    merge_gap: u16,
    max_registers: u16,
) -> Vec<ReadRequest> {
    let mut ordered: Vec<usize> = selected.to_vec();
    ordered.sort_by_key(|&i| tasks[i].start());
    ordered.dedup();

    let mut requests: Vec<ReadRequest> = Vec::new();
    for index in ordered {
        let task = &tasks[index];
        if let Some(last) = requests.last_mut() {
            let last_end = u32::from(last.start) + u32::from(last.count);
            let merged_end = last_end.max(task.end());
            let merged_count = merged_end - u32::from(last.start);
            if u32::from(task.start()) <= last_end + u32::from(merge_gap)
                && merged_count <= u32::from(max_registers)
            {
                last.count = merged_count as u16;
                last.tasks.push(index);
                continue;
            }
        }
        requests.push(ReadRequest {
            start: task.start(),
            count: task.register_count(),
            tasks: vec![index],
        });
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::element::{BitBinding, Element};
    use flux_channel::{Channel, ChannelKind};
    use flux_codec::WordOrder;
    use std::sync::Arc;

    fn int_element(name: &str, registers: u16) -> Element {
        let channel = Arc::new(
            Channel::builder("dev0", name)
                .kind(ChannelKind::Long)
                .build(),
        );
        Element::number(channel, registers, false, false, WordOrder::MswLsw, 0).unwrap()
    }

    fn read_task(start: u16, count: u16) -> Task {
        Task::read(
            start,
            count,
            Priority::Low,
            vec![int_element(&format!("R{start}"), count)],
        )
        .unwrap()
    }

    #[test]
    fn test_length_mismatch_is_config_error() {
        let result = Task::read(
            0,
            3,
            Priority::High,
            vec![int_element("A", 1), int_element("B", 1)],
        );
        assert!(matches!(result, Err(FieldSrvError::ConfigError(_))));
    }

    #[test]
    fn test_element_spans() {
        let task = Task::read(
            100,
            7,
            Priority::High,
            vec![
                int_element("A", 2),
                Element::reserved(1),
                int_element("B", 4),
            ],
        )
        .unwrap();

        let spans: Vec<u16> = task.element_spans().map(|(offset, _)| offset).collect();
        assert_eq!(spans, vec![0, 2, 3]);
    }

    #[test]
    fn test_write_task_rejects_bits() {
        let flag = Arc::new(
            Channel::builder("dev0", "Flag")
                .kind(ChannelKind::Boolean)
                .build(),
        );
        let bits = Element::bits(vec![BitBinding {
            bit: 0,
            channel: flag,
        }])
        .unwrap();
        assert!(matches!(
            Task::write(10, 1, vec![bits]),
            Err(FieldSrvError::ConfigError(_))
        ));
    }

    #[test]
    fn test_plan_merges_within_gap() {
        let tasks = vec![read_task(0, 2), read_task(4, 2), read_task(40, 2)];
        let requests = plan_read_requests(&tasks, &[0, 1, 2], 2, 125);

        assert_eq!(
            requests,
            vec![
                ReadRequest {
                    start: 0,
                    count: 6,
                    tasks: vec![0, 1]
                },
                ReadRequest {
                    start: 40,
                    count: 2,
                    tasks: vec![2]
                },
            ]
        );
    }

    #[test]
    fn test_plan_respects_gap_zero() {
        let tasks = vec![read_task(0, 2), read_task(3, 2)];
        let requests = plan_read_requests(&tasks, &[0, 1], 0, 125);
        assert_eq!(requests.len(), 2);

        // Strictly adjacent tasks still merge at gap 0.
        let tasks = vec![read_task(0, 2), read_task(2, 2)];
        let requests = plan_read_requests(&tasks, &[0, 1], 0, 125);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].count, 4);
    }

    #[test]
    fn test_plan_respects_max_registers() {
        let tasks = vec![read_task(0, 100), read_task(100, 100)];
        let requests = plan_read_requests(&tasks, &[0, 1], 4, 125);
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn test_plan_orders_unsorted_selection() {
        let tasks = vec![read_task(50, 2), read_task(0, 2)];
        let requests = plan_read_requests(&tasks, &[0, 1], 4, 125);
        assert_eq!(requests[0].start, 0);
        assert_eq!(requests[1].start, 50);
    }
}

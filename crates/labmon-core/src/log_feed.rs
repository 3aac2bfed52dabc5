use crate::wire::LogEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub event: LogEvent,
    pub received_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn timestamp(&self) -> String {
        self.event
            .time
            .clone()
            .unwrap_or_else(|| self.received_at.format("%H:%M:%S").to_string())
    }
}

// Capped ring buffer. Scroll position is measured from the bottom:
// offset zero follows the newest entry, a manual scroll away from the
// bottom holds the viewed region in place across appends.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    scroll_from_bottom: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            scroll_from_bottom: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_following(&self) -> bool {
        self.scroll_from_bottom == 0
    }

    pub fn push(&mut self, event: LogEvent, received_at: DateTime<Utc>) {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front();
            true
        } else {
            false
        };
        self.entries.push_back(LogEntry { event, received_at });

        if !self.is_following() {
            // Keep the viewed region anchored while new entries arrive
            // below it. An eviction pulls the whole log up by one, which
            // cancels out against the append.
            if !evicted {
                self.scroll_from_bottom =
                    (self.scroll_from_bottom + 1).min(self.entries.len().saturating_sub(1));
            }
        }
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_from_bottom =
            (self.scroll_from_bottom + lines).min(self.entries.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(lines);
    }

    pub fn jump_to_bottom(&mut self) {
        self.scroll_from_bottom = 0;
    }

    // Most recent `height` entries ending at the scroll position,
    // oldest first.
    pub fn visible(&self, height: usize) -> impl Iterator<Item = &LogEntry> {
        let end = self.entries.len().saturating_sub(self.scroll_from_bottom);
        let start = end.saturating_sub(height);
        self.entries.iter().skip(start).take(end - start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::LogLevel;

    fn event(msg: &str) -> LogEvent {
        LogEvent {
            msg: msg.to_string(),
            time: None,
            level: LogLevel::Message,
        }
    }

    fn filled(count: usize, capacity: usize) -> LogBuffer {
        let mut buffer = LogBuffer::new(capacity);
        for index in 0..count {
            buffer.push(event(&format!("event-{index}")), Utc::now());
        }
        buffer
    }

    #[test]
    fn appends_preserve_arrival_order() {
        let buffer = filled(4, 10);
        let messages: Vec<&str> = buffer.iter().map(|e| e.event.msg.as_str()).collect();
        assert_eq!(messages, vec!["event-0", "event-1", "event-2", "event-3"]);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let buffer = filled(5, 3);
        let messages: Vec<&str> = buffer.iter().map(|e| e.event.msg.as_str()).collect();
        assert_eq!(messages, vec!["event-2", "event-3", "event-4"]);
    }

    #[test]
    fn following_view_sticks_to_newest_entry() {
        let mut buffer = filled(6, 10);
        assert!(buffer.is_following());
        let visible: Vec<&str> = buffer
            .visible(2)
            .map(|e| e.event.msg.as_str())
            .collect();
        assert_eq!(visible, vec!["event-4", "event-5"]);

        buffer.push(event("event-6"), Utc::now());
        let visible: Vec<&str> = buffer
            .visible(2)
            .map(|e| e.event.msg.as_str())
            .collect();
        assert_eq!(visible, vec!["event-5", "event-6"]);
    }

    #[test]
    fn scrolled_view_is_retained_across_appends() {
        let mut buffer = filled(6, 10);
        buffer.scroll_up(3);
        assert!(!buffer.is_following());
        let before: Vec<String> = buffer
            .visible(2)
            .map(|e| e.event.msg.clone())
            .collect();

        buffer.push(event("event-6"), Utc::now());
        let after: Vec<String> = buffer
            .visible(2)
            .map(|e| e.event.msg.clone())
            .collect();
        assert_eq!(before, after, "append must not move a scrolled view");
    }

    #[test]
    fn scrolling_back_to_bottom_resumes_following() {
        let mut buffer = filled(6, 10);
        buffer.scroll_up(2);
        buffer.scroll_down(1);
        assert!(!buffer.is_following());
        buffer.scroll_down(5);
        assert!(buffer.is_following());
    }

    #[test]
    fn timestamp_prefers_the_event_time() {
        let now = Utc::now();
        let mut stamped = event("a");
        stamped.time = Some("12:00:00".to_string());
        let entry = LogEntry {
            event: stamped,
            received_at: now,
        };
        assert_eq!(entry.timestamp(), "12:00:00");

        let entry = LogEntry {
            event: event("b"),
            received_at: now,
        };
        assert_eq!(entry.timestamp(), now.format("%H:%M:%S").to_string());
    }
}

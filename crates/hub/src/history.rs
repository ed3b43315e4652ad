use std::collections::VecDeque;

use crate::channel::Channel;
use crate::reading::{Latest, Reading};

/// Maximum number of readings retained per channel.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Default)]
struct ChannelHistory {
    buffer: VecDeque<Reading>,
    latest: Option<Reading>,
}

/// Bounded per-channel reading buffers plus the latest snapshot of each.
#[derive(Default)]
pub struct HistoryStore {
    channels: [ChannelHistory; Channel::COUNT],
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in arrival order, evicting the oldest entries past capacity.
    pub fn append(&mut self, reading: Reading) {
        let slot = &mut self.channels[reading.channel.index()];
        slot.latest = Some(reading.clone());
        slot.buffer.push_back(reading);
        while slot.buffer.len() > HISTORY_CAPACITY {
            slot.buffer.pop_front();
        }
    }

    pub fn latest(&self, channel: Channel) -> Latest {
        match &self.channels[channel.index()].latest {
            Some(r) => Latest::Recorded(r.clone()),
            None => Latest::default_for(channel),
        }
    }

    /// Full window, oldest first.
    pub fn history(&self, channel: Channel) -> Vec<Reading> {
        self.channels[channel.index()].buffer.iter().cloned().collect()
    }

    pub fn count(&self, channel: Channel) -> usize {
        self.channels[channel.index()].buffer.len()
    }

    pub fn reset(&mut self, channel: Channel) {
        let slot = &mut self.channels[channel.index()];
        slot.buffer.clear();
        slot.latest = None;
    }

    pub fn reset_all(&mut self) {
        for c in Channel::ALL {
            self.reset(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{ChannelFields, PhFields, PumpFields, Source};

    fn ph_reading(ph: f64, at: i64) -> Reading {
        Reading::stamp(
            ChannelFields::Ph(PhFields { ph }),
            "dev".into(),
            Source::Device,
            at,
        )
    }

    #[test]
    fn starts_empty_with_defaults() {
        let store = HistoryStore::new();
        for c in Channel::ALL {
            assert_eq!(store.count(c), 0);
            assert_eq!(store.latest(c), Latest::default_for(c));
        }
    }

    #[test]
    fn append_updates_latest_and_buffer() {
        let mut store = HistoryStore::new();
        store.append(ph_reading(6.8, 1));
        store.append(ph_reading(6.9, 2));

        assert_eq!(store.count(Channel::Ph), 2);
        assert_eq!(store.latest(Channel::Ph).reading().unwrap().unix_timestamp, 2);
        assert_eq!(store.count(Channel::Power), 0);
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut store = HistoryStore::new();
        for i in 0..250 {
            store.append(ph_reading(7.0, i));
            assert!(store.count(Channel::Ph) <= HISTORY_CAPACITY);
        }

        let window = store.history(Channel::Ph);
        assert_eq!(window.len(), HISTORY_CAPACITY);
        let stamps: Vec<i64> = window.iter().map(|r| r.unix_timestamp).collect();
        let expected: Vec<i64> = (150..250).collect();
        assert_eq!(stamps, expected);
    }

    #[test]
    fn reads_are_repeatable() {
        let mut store = HistoryStore::new();
        store.append(ph_reading(6.1, 10));
        assert_eq!(store.history(Channel::Ph), store.history(Channel::Ph));
        assert_eq!(store.latest(Channel::Ph), store.latest(Channel::Ph));
    }

    #[test]
    fn reset_clears_only_that_channel() {
        let mut store = HistoryStore::new();
        store.append(ph_reading(6.1, 10));
        store.append(Reading::stamp(
            ChannelFields::Pump(PumpFields {
                status: true,
                mode: "auto".into(),
            }),
            "dev".into(),
            Source::Device,
            11,
        ));

        store.reset(Channel::Pump);

        assert_eq!(store.count(Channel::Pump), 0);
        assert_eq!(store.latest(Channel::Pump), Latest::default_for(Channel::Pump));
        assert_eq!(store.count(Channel::Ph), 1);
    }

    #[test]
    fn reset_all_clears_everything() {
        let mut store = HistoryStore::new();
        store.append(ph_reading(6.1, 10));
        store.reset_all();
        assert!(store.history(Channel::Ph).is_empty());
        assert_eq!(store.latest(Channel::Ph), Latest::Empty {});
    }
}

//! # RC Channels Module
//!
//! The manual-control setpoint vector streamed to the rover.
//!
//! ## Channel Assignments
//!
//! | Channel | Index | Function |
//! |---------|-------|----------|
//! | CH1 | 0 | Yaw |
//! | CH2 | 1 | Pitch |
//! | CH3 | 2 | Throttle |
//! | CH4 | 3 | Roll |
//! | CH5 | 4 | Aux 1 (modes) |
//! | CH6 | 5 | Aux 2 |
//! | CH7 | 6 | Aux 3 |
//! | CH8 | 7 | Aux 4 |
//!
//! ## Value Ranges
//!
//! - Valid range: 1000-2000
//! - Neutral: 1500
//!
//! Values outside the range are rejected, never clamped.
//!
//! ## Usage
//!
//! ```
//! use geodrive::protocol::channels::{Channel, RcChannels};
//!
//! let mut channels = RcChannels::neutral();
//! channels.set(Channel::Throttle, 1600)?;
//! assert_eq!(channels.get(Channel::Throttle), 1600);
//! assert!(channels.set(Channel::Yaw, 2500).is_err());
//! assert_eq!(channels.get(Channel::Yaw), 1500);
//! # Ok::<(), geodrive::error::GeodriveError>(())
//! ```

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GeodriveError, Result};

/// Number of RC channels
pub const RC_NUM_CHANNELS: usize = 8;

/// Channel value range
pub const RC_CHANNEL_VALUE_MIN: u16 = 1000;
pub const RC_CHANNEL_VALUE_MAX: u16 = 2000;
pub const RC_CHANNEL_VALUE_NEUTRAL: u16 = 1500;

/// Named RC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// CH1
    Yaw,
    /// CH2
    Pitch,
    /// CH3
    Throttle,
    /// CH4
    Roll,
    /// CH5
    Aux1,
    /// CH6
    Aux2,
    /// CH7
    Aux3,
    /// CH8
    Aux4,
}

impl Channel {
    /// All channels in wire order.
    pub const ALL: [Channel; RC_NUM_CHANNELS] = [
        Channel::Yaw,
        Channel::Pitch,
        Channel::Throttle,
        Channel::Roll,
        Channel::Aux1,
        Channel::Aux2,
        Channel::Aux3,
        Channel::Aux4,
    ];

    /// Zero-based position in the channel array.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// One-based channel number (CH1..CH8).
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8 + 1
    }

    /// Looks up a channel by its one-based number.
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::InvalidChannel`] for numbers outside 1-8.
    pub fn from_number(number: u8) -> Result<Self> {
        match number {
            1..=8 => Ok(Self::ALL[usize::from(number - 1)]),
            _ => Err(GeodriveError::InvalidChannel(number)),
        }
    }
}

/// Checks a value against the channel range.
fn validate_value(channel: Channel, value: u16) -> Result<u16> {
    if (RC_CHANNEL_VALUE_MIN..=RC_CHANNEL_VALUE_MAX).contains(&value) {
        Ok(value)
    } else {
        Err(GeodriveError::ChannelOutOfRange {
            channel: channel.number(),
            value,
            min: RC_CHANNEL_VALUE_MIN,
            max: RC_CHANNEL_VALUE_MAX,
        })
    }
}

/// Validated snapshot of all 8 RC channels.
///
/// Every value is always within 1000-2000. Construction and assignment
/// reject anything else and leave the existing values untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RcChannels {
    values: [u16; RC_NUM_CHANNELS],
}

impl Default for RcChannels {
    fn default() -> Self {
        Self::neutral()
    }
}

impl RcChannels {
    /// All channels at neutral (1500).
    #[must_use]
    pub const fn neutral() -> Self {
        Self {
            values: [RC_CHANNEL_VALUE_NEUTRAL; RC_NUM_CHANNELS],
        }
    }

    /// Builds a channel set from raw values in wire order.
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::ChannelOutOfRange`] for the first value outside 1000-2000.
    pub fn new(values: [u16; RC_NUM_CHANNELS]) -> Result<Self> {
        for channel in Channel::ALL {
            validate_value(channel, values[channel.index()])?;
        }
        Ok(Self { values })
    }

    /// Value of one channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> u16 {
        self.values[channel.index()]
    }

    /// Assigns one channel.
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::ChannelOutOfRange`] and leaves the value unchanged
    /// if `value` is outside 1000-2000.
    pub fn set(&mut self, channel: Channel, value: u16) -> Result<()> {
        self.values[channel.index()] = validate_value(channel, value)?;
        Ok(())
    }

    /// Builder-style assignment.
    ///
    /// # Errors
    ///
    /// Same as [`RcChannels::set`].
    pub fn with(mut self, channel: Channel, value: u16) -> Result<Self> {
        self.set(channel, value)?;
        Ok(self)
    }

    /// Raw values in wire order.
    #[must_use]
    pub fn values(&self) -> [u16; RC_NUM_CHANNELS] {
        self.values
    }

    /// True when every channel sits at neutral.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.values.iter().all(|&v| v == RC_CHANNEL_VALUE_NEUTRAL)
    }
}

impl<'de> Deserialize<'de> for RcChannels {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            values: [u16; RC_NUM_CHANNELS],
        }

        let raw = Raw::deserialize(deserializer)?;
        RcChannels::new(raw.values).map_err(serde::de::Error::custom)
    }
}

/// Live, shared view of the control surface.
///
/// The caller writes through one clone while the streaming loop reads through
/// another. Each channel is an independent atomic: a write is visible to the
/// next tick, and a reader may observe a mix of old and new channels for one
/// tick while a multi-channel update is in progress. No lock is ever held.
#[derive(Debug, Clone)]
pub struct RcChannelsHandle {
    values: Arc<[AtomicU16; RC_NUM_CHANNELS]>,
}

impl Default for RcChannelsHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RcChannelsHandle {
    /// Creates a handle with all channels at neutral.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Arc::new(std::array::from_fn(|_| {
                AtomicU16::new(RC_CHANNEL_VALUE_NEUTRAL)
            })),
        }
    }

    /// Current value of one channel.
    #[must_use]
    pub fn get(&self, channel: Channel) -> u16 {
        self.values[channel.index()].load(Ordering::Acquire)
    }

    /// Assigns one channel.
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::ChannelOutOfRange`] without touching the state
    /// if `value` is outside 1000-2000.
    pub fn set(&self, channel: Channel, value: u16) -> Result<()> {
        let value = validate_value(channel, value)?;
        self.values[channel.index()].store(value, Ordering::Release);
        Ok(())
    }

    /// Assigns a channel by its one-based number.
    ///
    /// # Errors
    ///
    /// [`GeodriveError::InvalidChannel`] or [`GeodriveError::ChannelOutOfRange`].
    pub fn set_number(&self, number: u8, value: u16) -> Result<()> {
        self.set(Channel::from_number(number)?, value)
    }

    /// Replaces every channel with an already validated set.
    pub fn store(&self, channels: &RcChannels) {
        for (slot, value) in self.values.iter().zip(channels.values()) {
            slot.store(value, Ordering::Release);
        }
    }

    /// Reads all channels.
    #[must_use]
    pub fn snapshot(&self) -> RcChannels {
        RcChannels {
            values: std::array::from_fn(|i| self.values[i].load(Ordering::Acquire)),
        }
    }

    /// Puts every channel back to neutral.
    pub fn reset(&self) {
        self.store(&RcChannels::neutral());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_channels() {
        let channels = RcChannels::neutral();
        assert!(channels.is_neutral());
        for channel in Channel::ALL {
            assert_eq!(channels.get(channel), 1500);
        }
    }

    #[test]
    fn test_channel_numbers() {
        assert_eq!(Channel::Yaw.number(), 1);
        assert_eq!(Channel::Throttle.index(), 2);
        assert_eq!(Channel::Aux4.number(), 8);
        assert_eq!(Channel::from_number(4).unwrap(), Channel::Roll);
    }

    #[test]
    fn test_invalid_channel_number() {
        assert!(matches!(
            Channel::from_number(0),
            Err(GeodriveError::InvalidChannel(0))
        ));
        assert!(matches!(
            Channel::from_number(9),
            Err(GeodriveError::InvalidChannel(9))
        ));
    }

    #[test]
    fn test_in_range_values_stored_unchanged() {
        let mut channels = RcChannels::neutral();
        for value in [1000, 1001, 1250, 1500, 1777, 1999, 2000] {
            for channel in Channel::ALL {
                channels.set(channel, value).unwrap();
                assert_eq!(channels.get(channel), value);
            }
        }
    }

    #[test]
    fn test_out_of_range_rejected_without_mutation() {
        let mut channels = RcChannels::neutral().with(Channel::Pitch, 1200).unwrap();
        for value in [0, 999, 2001, u16::MAX] {
            let result = channels.set(Channel::Pitch, value);
            assert!(matches!(
                result,
                Err(GeodriveError::ChannelOutOfRange { channel: 2, .. })
            ));
            assert_eq!(channels.get(Channel::Pitch), 1200);
        }
    }

    #[test]
    fn test_new_rejects_any_bad_value() {
        let mut values = [1500; RC_NUM_CHANNELS];
        values[6] = 2500;
        match RcChannels::new(values) {
            Err(GeodriveError::ChannelOutOfRange { channel, value, .. }) => {
                assert_eq!(channel, 7);
                assert_eq!(value, 2500);
            }
            other => panic!("Expected ChannelOutOfRange, got: {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: RcChannels =
            serde_json::from_str(r#"{"values":[1000,1100,1200,1300,1400,1500,1600,2000]}"#)
                .unwrap();
        assert_eq!(ok.get(Channel::Aux4), 2000);

        let bad = serde_json::from_str::<RcChannels>(
            r#"{"values":[900,1500,1500,1500,1500,1500,1500,1500]}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_handle_shares_state_between_clones() {
        let writer = RcChannelsHandle::new();
        let reader = writer.clone();

        writer.set(Channel::Yaw, 1600).unwrap();
        assert_eq!(reader.get(Channel::Yaw), 1600);
        assert_eq!(reader.snapshot().get(Channel::Yaw), 1600);
    }

    #[test]
    fn test_handle_rejects_out_of_range() {
        let handle = RcChannelsHandle::new();
        handle.set(Channel::Roll, 1800).unwrap();
        assert!(handle.set(Channel::Roll, 2001).is_err());
        assert!(handle.set_number(9, 1500).is_err());
        assert_eq!(handle.get(Channel::Roll), 1800);
    }

    #[test]
    fn test_handle_reset_and_store() {
        let handle = RcChannelsHandle::new();
        let channels = RcChannels::new([1000, 1100, 1200, 1300, 1700, 1800, 1900, 2000]).unwrap();
        handle.store(&channels);
        assert_eq!(handle.snapshot(), channels);

        handle.reset();
        assert!(handle.snapshot().is_neutral());
    }
}

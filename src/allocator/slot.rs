//! Candidate device slots and their naming aliases.

use std::fmt;

/// Letters usable for data volumes, in scan order.
const SLOT_LETTERS: [char; 11] = ['f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p'];

/// One of the device letters `f` to `p`.
///
/// A slot is named `/dev/sd<letter>` in attach requests; the kernel may expose
/// it as either `sd<letter>` or `xvd<letter>`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceSlot(char);

impl DeviceSlot {
    /// All slots in ascending scan order.
    pub fn all() -> impl Iterator<Item = Self> {
        SLOT_LETTERS.into_iter().map(Self)
    }

    /// Slot for `letter`, if it is one of `f` to `p`.
    #[must_use]
    pub fn from_letter(letter: char) -> Option<Self> {
        SLOT_LETTERS.contains(&letter).then_some(Self(letter))
    }

    /// Parses a provider device name such as `/dev/sdf` or `/dev/xvdg`.
    #[must_use]
    pub fn from_device_name(device: &str) -> Option<Self> {
        let node = device.strip_prefix("/dev/")?;
        let suffix = node
            .strip_prefix("sd")
            .or_else(|| node.strip_prefix("xvd"))?;
        let mut chars = suffix.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => Self::from_letter(letter),
            _ => None,
        }
    }

    /// Device letter.
    #[must_use]
    pub const fn letter(self) -> char {
        self.0
    }

    /// Device name used in attach requests.
    #[must_use]
    pub fn provider_device(self) -> String {
        format!("/dev/sd{}", self.0)
    }

    /// Local device node names under which the slot may appear, primary first.
    #[must_use]
    pub fn aliases(self) -> [String; 2] {
        [format!("sd{}", self.0), format!("xvd{}", self.0)]
    }
}

impl fmt::Display for DeviceSlot {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "sd{}", self.0)
    }
}

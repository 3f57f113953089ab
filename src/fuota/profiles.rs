//! # Multicast Link Profiles
//!
//! Static radio parameters for every supported combination of multicast
//! class and downlink speed. The table is an exhaustive match, so a missing
//! profile is unrepresentable rather than a runtime failure.

use crate::constants::SESSION_GUARD_BAND_S;

/// LoRaWAN multicast device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulticastClass {
    /// Scheduled receive windows (ping slots) synchronized to a beacon
    ClassB,
    /// Continuous receive except when transmitting
    ClassC,
}

impl MulticastClass {
    /// Name used on the orchestrator wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            MulticastClass::ClassB => "CLASS_B",
            MulticastClass::ClassC => "CLASS_C",
        }
    }
}

/// Downlink speed grade selecting a profile row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownlinkSpeed {
    Fast,
    Medium,
    Slow,
}

/// LoRaWAN regional parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Us915,
    Eu868,
    As923,
    As923Grp2,
    As923Grp3,
    As923Grp4,
    Au915,
    Cn470,
    In865,
    Kr920,
    Ru864,
}

impl Region {
    /// Name used on the orchestrator wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Region::Us915 => "US915",
            Region::Eu868 => "EU868",
            Region::As923 => "AS923",
            Region::As923Grp2 => "AS923_2",
            Region::As923Grp3 => "AS923_3",
            Region::As923Grp4 => "AS923_4",
            Region::Au915 => "AU915",
            Region::Cn470 => "CN470",
            Region::In865 => "IN865",
            Region::Kr920 => "KR920",
            Region::Ru864 => "RU864",
        }
    }
}

/// Link parameters for one (class, speed) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    /// Chunk size for the multicast send engine, in bytes
    pub mtu: usize,
    /// Multicast data rate index
    pub multicast_dr: u8,
    /// Multicast session timeout exponent (seconds are 2^exp, or
    /// 128 * 2^exp beacon periods for class B)
    pub multicast_timeout_exponent: u32,
    /// Per-device unicast setup timeout in seconds
    pub unicast_timeout_s: u64,
    /// Fragmentation fragment size in bytes
    pub fragment_size: u32,
    /// Redundant fragments per session
    pub redundancy: u32,
    /// Class-B ping slot periodicity
    pub ping_slot_period: u32,
}

impl Profile {
    /// Returns the static profile for a (class, speed) pair.
    pub const fn lookup(class: MulticastClass, speed: DownlinkSpeed) -> &'static Profile {
        match (class, speed) {
            (MulticastClass::ClassC, DownlinkSpeed::Fast) => &Profile {
                mtu: 1024,
                multicast_dr: 13,
                multicast_timeout_exponent: 6,
                unicast_timeout_s: 15,
                fragment_size: 232,
                redundancy: 10,
                ping_slot_period: 1,
            },
            (MulticastClass::ClassC, DownlinkSpeed::Medium) => &Profile {
                mtu: 1024,
                multicast_dr: 11,
                multicast_timeout_exponent: 7,
                unicast_timeout_s: 30,
                fragment_size: 128,
                redundancy: 40,
                ping_slot_period: 1,
            },
            (MulticastClass::ClassC, DownlinkSpeed::Slow) => &Profile {
                mtu: 1024,
                multicast_dr: 9,
                multicast_timeout_exponent: 8,
                unicast_timeout_s: 45,
                fragment_size: 64,
                redundancy: 100,
                ping_slot_period: 1,
            },
            (MulticastClass::ClassB, DownlinkSpeed::Fast) => &Profile {
                mtu: 1024,
                multicast_dr: 13,
                multicast_timeout_exponent: 3,
                unicast_timeout_s: 30,
                fragment_size: 232,
                redundancy: 10,
                ping_slot_period: 1,
            },
            (MulticastClass::ClassB, DownlinkSpeed::Medium) => &Profile {
                mtu: 1024,
                multicast_dr: 11,
                multicast_timeout_exponent: 4,
                unicast_timeout_s: 60,
                fragment_size: 128,
                redundancy: 40,
                ping_slot_period: 2,
            },
            (MulticastClass::ClassB, DownlinkSpeed::Slow) => &Profile {
                mtu: 1024,
                multicast_dr: 9,
                multicast_timeout_exponent: 5,
                unicast_timeout_s: 90,
                fragment_size: 64,
                redundancy: 100,
                ping_slot_period: 4,
            },
        }
    }
}

/// Quiet period to wait after creating a deployment before the first status
/// poll: the multicast session window for the class, the profile's unicast
/// setup timeout, and a fixed guard band.
pub fn multicast_timeout_seconds(class: MulticastClass, speed: DownlinkSpeed) -> u64 {
    let profile = Profile::lookup(class, speed);
    let session = match class {
        MulticastClass::ClassC => 1u64 << profile.multicast_timeout_exponent,
        MulticastClass::ClassB => 128 * (1u64 << profile.multicast_timeout_exponent),
    };
    session + profile.unicast_timeout_s + SESSION_GUARD_BAND_S
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_c_slow_timeout() {
        assert_eq!(
            multicast_timeout_seconds(MulticastClass::ClassC, DownlinkSpeed::Slow),
            361
        );
    }

    #[test]
    fn class_b_slow_timeout() {
        assert_eq!(
            multicast_timeout_seconds(MulticastClass::ClassB, DownlinkSpeed::Slow),
            4246
        );
    }

    #[test]
    fn fragments_never_exceed_mtu() {
        for class in [MulticastClass::ClassB, MulticastClass::ClassC] {
            for speed in [DownlinkSpeed::Fast, DownlinkSpeed::Medium, DownlinkSpeed::Slow] {
                let profile = Profile::lookup(class, speed);
                assert!(profile.fragment_size as usize <= profile.mtu);
                assert!(profile.mtu > 0);
            }
        }
    }

    #[test]
    fn region_wire_names() {
        assert_eq!(Region::Us915.wire_name(), "US915");
        assert_eq!(Region::As923Grp4.wire_name(), "AS923_4");
        assert_eq!(MulticastClass::ClassC.wire_name(), "CLASS_C");
    }
}

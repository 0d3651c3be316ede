use crate::hal::ChannelId;

/// Entry in the controller's signal catalog.
#[derive(Debug, Clone, Copy)]
pub struct SignalTag {
    pub key: &'static str,
    pub index: u32,
    pub label: &'static str,
    pub unit: &'static str,
}

impl SignalTag {
    pub const fn channel(&self) -> ChannelId {
        ChannelId(self.index)
    }
}

pub const DEMOD_X: SignalTag = SignalTag {
    key: "dmod_x",
    index: 86,
    label: "LI Demod 1 X",
    unit: "V",
};

pub const DEMOD_Y: SignalTag = SignalTag {
    key: "dmod_y",
    index: 87,
    label: "LI Demod 1 Y",
    unit: "V",
};

/// Ratio of flake resistance to the series resistor, computed by the
/// controller's signal math.
pub const RESISTANCE_RATIO: SignalTag = SignalTag {
    key: "r_ratio",
    index: 31,
    label: "Resistance ratio",
    unit: "",
};

/// User output driving the gate when no source-meter is used.
pub const GATE_OUTPUT: SignalTag = SignalTag {
    key: "gate_output",
    index: 8,
    label: "Output 8",
    unit: "V",
};

pub const CATALOG: &[SignalTag] = &[DEMOD_X, DEMOD_Y, RESISTANCE_RATIO, GATE_OUTPUT];

pub fn by_index(index: u32) -> Option<&'static SignalTag> {
    CATALOG.iter().find(|tag| tag.index == index)
}

pub fn by_key(key: &str) -> Option<&'static SignalTag> {
    CATALOG.iter().find(|tag| tag.key == key)
}

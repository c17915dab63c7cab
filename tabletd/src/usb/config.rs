/// A USB Configuration descriptor header (USB2 section 9.6.3).
///
/// On the wire this header is followed by the interface, class and endpoint
/// descriptors of the configuration; `total_length` covers the whole set and
/// is computed during assembly, never stored by hand.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub kind: u8,
    pub total_length: u16,
    pub interfaces: u8,
    pub configuration_value: u8,
    pub configuration_str: u8,
    pub attributes: u8,
    pub max_power: u8,
}

unsafe impl plain::Plain for ConfigDescriptor {}

/// bmAttributes bit 7, required to be set by USB2 Table 9-10.
pub const CONFIG_ATT_ONE: u8 = 1 << 7;
/// bmAttributes self-powered bit.
pub const CONFIG_ATT_SELFPOWER: u8 = 1 << 6;

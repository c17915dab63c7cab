//! Wire-format USB descriptor and request structures.
//!
//! All descriptors are `#[repr(C, packed)]` and implement [plain::Plain], so
//! they can be reinterpreted as the exact byte sequences the host reads
//! during enumeration. Field meanings follow USB2 chapter 9 and the HID 1.11
//! class specification.

pub mod config;
pub mod device;
pub mod endpoint;
pub mod hid;
pub mod interface;
pub mod setup;

use std::{mem, slice};

/// Direction bit of an endpoint address or a SETUP bmRequestType (bit 7).
pub const USB_DIR_IN: u8 = 1 << 7;

/// Transfer-type bits of an endpoint's bmAttributes.
pub const ENDP_ATTR_TY_MASK: u8 = 0b11;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum EndpointTy {
    Ctrl = 0,
    Isoch = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Descriptor type tags, the high byte of wValue in GET_DESCRIPTOR.
///
/// The 0x21..=0x23 range is HID class specific (HID 1.11 section 7.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DescriptorKind {
    Device,
    Configuration,
    Str,
    Interface,
    Endpoint,
    DeviceQualifier,
    OtherSpeedConfiguration,
    Hid,
    HidReport,
    HidPhysical,
    Other(u8),
}

impl From<u8> for DescriptorKind {
    fn from(kind: u8) -> Self {
        match kind {
            1 => Self::Device,
            2 => Self::Configuration,
            3 => Self::Str,
            4 => Self::Interface,
            5 => Self::Endpoint,
            6 => Self::DeviceQualifier,
            7 => Self::OtherSpeedConfiguration,
            0x21 => Self::Hid,
            0x22 => Self::HidReport,
            0x23 => Self::HidPhysical,
            other => Self::Other(other),
        }
    }
}

/// The exact bytes of a packed descriptor, as transferred on the wire.
pub fn descriptor_bytes<T: plain::Plain>(desc: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(desc as *const T as *const u8, mem::size_of::<T>()) }
}

/// Descriptor type tag values as they appear in descriptor headers.
pub mod desc_ty {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const STRING: u8 = 3;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
    pub const DEVICE_QUALIFIER: u8 = 6;
    pub const HID: u8 = 0x21;
    pub const HID_REPORT: u8 = 0x22;
}

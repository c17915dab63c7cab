//! The immutable descriptor catalog of the emulated tablet.
//!
//! Everything the host can ask for during enumeration comes from here: the
//! device, qualifier, configuration-set, HID report and string descriptors.
//! The catalog is built once per session; the only field that ever changes
//! afterwards is the interrupt endpoint's address, assigned during
//! negotiation.

use crate::error::{Result, TabletError};
use crate::usb::config::{ConfigDescriptor, CONFIG_ATT_ONE, CONFIG_ATT_SELFPOWER};
use crate::usb::descriptor_bytes;
use crate::usb::desc_ty;
use crate::usb::device::{DeviceDescriptor, DeviceQualifier};
use crate::usb::endpoint::{EndpointDescriptor, ENDPOINT_WIRE_SIZE};
use crate::usb::hid::HidDescriptor;
use crate::usb::interface::{InterfaceDescriptor, CLASS_HID};
use crate::usb::USB_DIR_IN;

const BCD_USB: u16 = 0x0200;
const BCD_HID: u16 = 0x0110;

const USB_VENDOR: u16 = 0x056a;
const USB_PRODUCT: u16 = 0xffab;

pub const LANG_EN_US: u16 = 0x0409;
pub const STRING_ID_MANUFACTURER: u8 = 1;
pub const STRING_ID_PRODUCT: u8 = 2;
pub const STRING_ID_SERIAL: u8 = 3;

pub const EP_MAX_PACKET_CONTROL: u8 = 64;
pub const EP_MAX_PACKET_INT: u16 = 8;

/// The digitizer report descriptor: one application collection with a stylus,
/// five switch usages plus two constant padding bits, 16-bit X/Y in a
/// 16000x9000 logical area (centimeter units, exponent -3), and 16-bit tip
/// pressure up to 1023.
pub const HID_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x0D, //        Usage Page (Digitizer)
    0x09, 0x02, //        Usage (Pen)
    0xA1, 0x01, //        Collection (Application)
    0x85, 0x06, //            Report ID (6)
    0x09, 0x20, //            Usage (Stylus)
    0xA0, //                  Collection (Physical)
    0x09, 0x42, //                Usage (Tip Switch)
    0x09, 0x44, //                Usage (Barrel Switch)
    0x09, 0x45, //                Usage (Eraser)
    0x09, 0x3C, //                Usage (Invert)
    0x08, //                      Usage (00h)
    0x09, 0x32, //                Usage (In Range)
    0x14, //                      Logical Minimum (0)
    0x25, 0x01, //                Logical Maximum (1)
    0x75, 0x01, //                Report Size (1)
    0x95, 0x06, //                Report Count (6)
    0x81, 0x02, //                Input (Variable)
    0x95, 0x02, //                Report Count (2)
    0x81, 0x03, //                Input (Constant, Variable)
    0x05, 0x01, //                Usage Page (Desktop)
    0x09, 0x30, //                Usage (X)
    0x26, 0x80, 0x3E, //          Logical Maximum (16000)
    0x46, 0x80, 0x3E, //          Physical Maximum (16000)
    0x65, 0x11, //                Unit (Centimeter)
    0x55, 0x0D, //                Unit Exponent (13)
    0x75, 0x10, //                Report Size (16)
    0x95, 0x01, //                Report Count (1)
    0x81, 0x02, //                Input (Variable)
    0x09, 0x31, //                Usage (Y)
    0x26, 0x28, 0x23, //          Logical Maximum (9000)
    0x46, 0x28, 0x23, //          Physical Maximum (9000)
    0x81, 0x02, //                Input (Variable)
    0x44, //                      Physical Maximum (0)
    0x64, //                      Unit
    0x54, //                      Unit Exponent (0)
    0x05, 0x0D, //                Usage Page (Digitizer)
    0x09, 0x30, //                Usage (Tip Pressure)
    0x26, 0xFF, 0x03, //          Logical Maximum (1023)
    0x75, 0x10, //                Report Size (16)
    0x81, 0x02, //                Input (Variable)
    0xC0, //                  End Collection
    0xC0, //              End Collection
];

/// String descriptor table: (id, language) to payload, plus the language
/// list answered for id zero.
pub struct StringTable {
    languages: &'static [u16],
    manufacturer: &'static str,
    product: &'static str,
    serial: &'static str,
}

impl StringTable {
    /// Formats the string descriptor for `(id, language)`, or `None` when
    /// the pair is not defined (the dispatcher answers that with a stall).
    ///
    /// Wire format: byte 0 total length (payload + 2), byte 1 the string
    /// descriptor type tag, then the UTF-16LE payload.
    pub fn descriptor(&self, id: u8, language: u16) -> Option<Vec<u8>> {
        let payload: Vec<u8> = if id == 0 {
            self.languages
                .iter()
                .flat_map(|lang| lang.to_le_bytes())
                .collect()
        } else {
            if language != LANG_EN_US {
                return None;
            }
            let s = match id {
                STRING_ID_MANUFACTURER => self.manufacturer,
                STRING_ID_PRODUCT => self.product,
                STRING_ID_SERIAL => self.serial,
                _ => return None,
            };
            // A trailing NUL code unit is kept in the payload.
            s.encode_utf16()
                .chain(std::iter::once(0))
                .flat_map(|unit| unit.to_le_bytes())
                .collect()
        };

        let mut desc = Vec::with_capacity(payload.len() + 2);
        desc.push((payload.len() + 2) as u8);
        desc.push(desc_ty::STRING);
        desc.extend_from_slice(&payload);
        Some(desc)
    }
}

/// The full descriptor set of the emulated tablet.
pub struct DescriptorCatalog {
    pub device: DeviceDescriptor,
    pub qualifier: DeviceQualifier,
    pub config: ConfigDescriptor,
    pub interface: InterfaceDescriptor,
    pub hid: HidDescriptor,
    /// The logical interrupt IN endpoint. Its address starts at zero and is
    /// assigned in place during endpoint negotiation.
    pub endpoint: EndpointDescriptor,
    pub strings: StringTable,
}

impl DescriptorCatalog {
    pub fn new() -> Self {
        Self {
            device: DeviceDescriptor {
                length: std::mem::size_of::<DeviceDescriptor>() as u8,
                kind: desc_ty::DEVICE,
                usb: BCD_USB,
                class: 0,
                sub_class: 0,
                protocol: 0,
                packet_size: EP_MAX_PACKET_CONTROL,
                vendor: USB_VENDOR,
                product: USB_PRODUCT,
                release: 0,
                manufacturer_str: STRING_ID_MANUFACTURER,
                product_str: STRING_ID_PRODUCT,
                serial_str: STRING_ID_SERIAL,
                configurations: 1,
            },
            qualifier: DeviceQualifier {
                length: std::mem::size_of::<DeviceQualifier>() as u8,
                kind: desc_ty::DEVICE_QUALIFIER,
                usb: BCD_USB,
                class: 0,
                sub_class: 0,
                protocol: 0,
                packet_size: EP_MAX_PACKET_CONTROL,
                configurations: 1,
                _rsvd: 0,
            },
            config: ConfigDescriptor {
                length: std::mem::size_of::<ConfigDescriptor>() as u8,
                kind: desc_ty::CONFIGURATION,
                // Recomputed on every assembly, see write_configuration.
                total_length: 0,
                interfaces: 1,
                configuration_value: 1,
                configuration_str: 0,
                attributes: CONFIG_ATT_ONE | CONFIG_ATT_SELFPOWER,
                max_power: 0x32,
            },
            interface: InterfaceDescriptor {
                length: std::mem::size_of::<InterfaceDescriptor>() as u8,
                kind: desc_ty::INTERFACE,
                number: 0,
                alternate_setting: 0,
                endpoints: 1,
                class: CLASS_HID,
                sub_class: 1,
                protocol: 1,
                interface_str: 0,
            },
            hid: HidDescriptor {
                length: std::mem::size_of::<HidDescriptor>() as u8,
                kind: desc_ty::HID,
                hid: BCD_HID,
                country_code: 0,
                descriptors: 1,
                report_kind: desc_ty::HID_REPORT,
                report_length: HID_REPORT_DESCRIPTOR.len() as u16,
            },
            endpoint: EndpointDescriptor {
                length: ENDPOINT_WIRE_SIZE as u8,
                kind: desc_ty::ENDPOINT,
                // Number assigned during negotiation.
                address: USB_DIR_IN,
                attributes: crate::usb::EndpointTy::Interrupt as u8,
                max_packet_size: EP_MAX_PACKET_INT,
                interval: 5,
                refresh: 0,
                synch_address: 0,
            },
            strings: StringTable {
                languages: &[LANG_EN_US],
                manufacturer: "Wacom Co., Ltd.",
                product: "Software Tablet",
                serial: "19830712",
            },
        }
    }

    pub fn device_bytes(&self) -> &[u8] {
        descriptor_bytes(&self.device)
    }

    pub fn qualifier_bytes(&self) -> &[u8] {
        descriptor_bytes(&self.qualifier)
    }

    /// Assembles the configuration descriptor set into `buf`: configuration,
    /// interface, HID class and endpoint descriptors concatenated, with the
    /// computed total length written into the configuration header. Returns
    /// the total length.
    pub fn write_configuration(&self, buf: &mut [u8]) -> Result<usize> {
        let parts: [&[u8]; 4] = [
            descriptor_bytes(&self.config),
            descriptor_bytes(&self.interface),
            descriptor_bytes(&self.hid),
            &descriptor_bytes(&self.endpoint)[..ENDPOINT_WIRE_SIZE],
        ];
        let total: usize = parts.iter().map(|part| part.len()).sum();
        if buf.len() < total {
            return Err(TabletError::BufferTooSmall {
                needed: total,
                available: buf.len(),
            });
        }

        let mut offset = 0;
        for part in parts {
            buf[offset..offset + part.len()].copy_from_slice(part);
            offset += part.len();
        }
        // wTotalLength lives at offset 2 of the configuration header.
        buf[2..4].copy_from_slice(&(total as u16).to_le_bytes());
        Ok(total)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;

    #[test]
    fn config_total_length_is_computed() {
        let catalog = DescriptorCatalog::new();
        let mut buf = [0u8; 64];
        let total = catalog.write_configuration(&mut buf).unwrap();

        let expected = mem::size_of::<ConfigDescriptor>()
            + mem::size_of::<InterfaceDescriptor>()
            + mem::size_of::<HidDescriptor>()
            + ENDPOINT_WIRE_SIZE;
        assert_eq!(total, expected);
        assert_eq!(total, 34);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), total as u16);
        // The set must open with the configuration header and close with the
        // endpoint descriptor.
        assert_eq!(buf[1], desc_ty::CONFIGURATION);
        assert_eq!(buf[total - ENDPOINT_WIRE_SIZE + 1], desc_ty::ENDPOINT);
    }

    #[test]
    fn config_assembly_rejects_small_buffers() {
        let catalog = DescriptorCatalog::new();
        let mut buf = [0u8; 16];
        match catalog.write_configuration(&mut buf) {
            Err(TabletError::BufferTooSmall { needed, available }) => {
                assert_eq!(needed, 34);
                assert_eq!(available, 16);
            }
            other => panic!("expected BufferTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn device_descriptor_is_eighteen_bytes() {
        let catalog = DescriptorCatalog::new();
        let bytes = catalog.device_bytes();
        assert_eq!(bytes.len(), 18);
        assert_eq!(bytes[0], 18);
        assert_eq!(bytes[1], desc_ty::DEVICE);
        // idVendor/idProduct, little endian.
        assert_eq!(&bytes[8..12], &[0x6a, 0x05, 0xab, 0xff]);
    }

    #[test]
    fn string_descriptors_are_framed() {
        let catalog = DescriptorCatalog::new();
        for id in [STRING_ID_MANUFACTURER, STRING_ID_PRODUCT, STRING_ID_SERIAL] {
            let desc = catalog.strings.descriptor(id, LANG_EN_US).unwrap();
            assert_eq!(desc[0] as usize, desc.len());
            assert_eq!(desc[1], desc_ty::STRING);
        }

        // The serial is ASCII: 8 characters plus the NUL code unit.
        let serial = catalog.strings.descriptor(STRING_ID_SERIAL, LANG_EN_US).unwrap();
        assert_eq!(serial[0] as usize, 2 + 2 * 9);
        assert_eq!(&serial[2..4], &[b'1', 0]);
    }

    #[test]
    fn language_list_and_unknown_strings() {
        let catalog = DescriptorCatalog::new();
        let langs = catalog.strings.descriptor(0, 0).unwrap();
        assert_eq!(langs, vec![4, desc_ty::STRING, 0x09, 0x04]);

        assert!(catalog.strings.descriptor(7, LANG_EN_US).is_none());
        assert!(catalog
            .strings
            .descriptor(STRING_ID_PRODUCT, 0x0407)
            .is_none());
    }

    #[test]
    fn report_descriptor_length_matches_hid_class_descriptor() {
        let catalog = DescriptorCatalog::new();
        assert_eq!(
            { catalog.hid.report_length } as usize,
            HID_REPORT_DESCRIPTOR.len()
        );
    }
}

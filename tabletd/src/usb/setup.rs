use super::DescriptorKind;

/// The 8-byte SETUP packet received with every control event
/// (USB2 section 9.3).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Setup {
    pub kind: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

unsafe impl plain::Plain for Setup {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ReqDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

pub const USB_SETUP_DIR_BIT: u8 = 1 << 7;
pub const USB_SETUP_REQ_TY_MASK: u8 = 0x60;
pub const USB_SETUP_REQ_TY_SHIFT: u8 = 5;
pub const USB_SETUP_RECIPIENT_MASK: u8 = 0x1F;

/// Standard request codes (USB2 Table 9-4).
pub mod req {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_DESCRIPTOR: u8 = 0x07;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    pub const GET_INTERFACE: u8 = 0x0A;
    pub const SET_INTERFACE: u8 = 0x0B;
}

/// HID class request codes (HID 1.11 section 7.2).
pub mod hid_req {
    pub const GET_REPORT: u8 = 0x01;
    pub const GET_IDLE: u8 = 0x02;
    pub const GET_PROTOCOL: u8 = 0x03;
    pub const SET_REPORT: u8 = 0x09;
    pub const SET_IDLE: u8 = 0x0A;
    pub const SET_PROTOCOL: u8 = 0x0B;
}

/// A SETUP packet classified by request-type class, request code, and (for
/// GET_DESCRIPTOR) descriptor sub-type. Every control event maps to exactly
/// one variant; requests the device does not model land in the `Other`
/// variants and the dispatcher decides their fate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Standard(StandardRequest),
    Class(ClassRequest),
    Vendor(u8),
    Reserved(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StandardRequest {
    GetDescriptor {
        kind: DescriptorKind,
        /// Low byte of wValue; for string descriptors, the string id.
        index: u8,
        /// wIndex; for string descriptors, the language id.
        language: u16,
    },
    SetConfiguration {
        value: u8,
    },
    GetInterface,
    Other(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClassRequest {
    SetReport,
    SetIdle,
    SetProtocol,
    Other(u8),
}

impl Setup {
    pub fn direction(&self) -> ReqDirection {
        if self.kind & USB_SETUP_DIR_BIT == 0 {
            ReqDirection::HostToDevice
        } else {
            ReqDirection::DeviceToHost
        }
    }

    pub const fn req_ty(&self) -> u8 {
        (self.kind & USB_SETUP_REQ_TY_MASK) >> USB_SETUP_REQ_TY_SHIFT
    }

    pub const fn req_recipient(&self) -> u8 {
        self.kind & USB_SETUP_RECIPIENT_MASK
    }

    pub fn classify(&self) -> RequestKind {
        match self.req_ty() {
            0 => RequestKind::Standard(match self.request {
                req::GET_DESCRIPTOR => StandardRequest::GetDescriptor {
                    kind: DescriptorKind::from((self.value >> 8) as u8),
                    index: self.value as u8,
                    language: self.index,
                },
                req::SET_CONFIGURATION => StandardRequest::SetConfiguration {
                    value: self.value as u8,
                },
                req::GET_INTERFACE => StandardRequest::GetInterface,
                other => StandardRequest::Other(other),
            }),
            1 => RequestKind::Class(match self.request {
                hid_req::SET_REPORT => ClassRequest::SetReport,
                hid_req::SET_IDLE => ClassRequest::SetIdle,
                hid_req::SET_PROTOCOL => ClassRequest::SetProtocol,
                other => ClassRequest::Other(other),
            }),
            2 => RequestKind::Vendor(self.request),
            _ => RequestKind::Reserved(self.request),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::usb::DescriptorKind;

    fn setup(kind: u8, request: u8, value: u16, index: u16, length: u16) -> Setup {
        Setup {
            kind,
            request,
            value,
            index,
            length,
        }
    }

    #[test]
    fn get_descriptor_classification() {
        let s = setup(0x80, req::GET_DESCRIPTOR, 0x0302, 0x0409, 255);
        assert_eq!(
            s.classify(),
            RequestKind::Standard(StandardRequest::GetDescriptor {
                kind: DescriptorKind::Str,
                index: 2,
                language: 0x0409,
            })
        );
        assert_eq!(s.direction(), ReqDirection::DeviceToHost);
    }

    #[test]
    fn class_and_vendor_classification() {
        let s = setup(0x21, hid_req::SET_IDLE, 0, 0, 0);
        assert_eq!(s.classify(), RequestKind::Class(ClassRequest::SetIdle));
        assert_eq!(s.direction(), ReqDirection::HostToDevice);

        let s = setup(0x40, 0x13, 0, 0, 0);
        assert_eq!(s.classify(), RequestKind::Vendor(0x13));
    }

    #[test]
    fn parses_from_event_payload() {
        let raw = [0x80u8, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00];
        let s: &Setup = plain::from_bytes(&raw).unwrap();
        assert_eq!({ s.length }, 18);
        assert_eq!(
            s.classify(),
            RequestKind::Standard(StandardRequest::GetDescriptor {
                kind: DescriptorKind::Device,
                index: 0,
                language: 0,
            })
        );
    }
}

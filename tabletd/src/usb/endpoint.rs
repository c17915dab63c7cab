use super::{EndpointTy, ENDP_ATTR_TY_MASK, USB_DIR_IN};

/// A USB Endpoint descriptor (USB2 section 9.6.6).
///
/// The wire form during enumeration is the first [ENDPOINT_WIRE_SIZE] bytes;
/// the two trailing audio-class fields exist only in the in-memory form the
/// kernel expects when enabling an endpoint.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub kind: u8,
    /// Endpoint number in bits 3..0, direction in bit 7 (bEndpointAddress).
    pub address: u8,
    /// Transfer type in bits 1..0 (bmAttributes).
    pub attributes: u8,
    pub max_packet_size: u16,
    /// Polling interval for interrupt endpoints (bInterval).
    pub interval: u8,
    pub refresh: u8,
    pub synch_address: u8,
}

unsafe impl plain::Plain for EndpointDescriptor {}

/// Length of the endpoint descriptor as sent to the host.
pub const ENDPOINT_WIRE_SIZE: usize = 7;

/// bEndpointAddress endpoint-number bits.
pub const ENDPOINT_NUMBER_MASK: u8 = 0x0F;

impl EndpointDescriptor {
    pub fn number(&self) -> u8 {
        self.address & ENDPOINT_NUMBER_MASK
    }

    pub fn is_in(&self) -> bool {
        self.address & USB_DIR_IN != 0
    }

    pub fn ty(&self) -> EndpointTy {
        match self.attributes & ENDP_ATTR_TY_MASK {
            0 => EndpointTy::Ctrl,
            1 => EndpointTy::Isoch,
            2 => EndpointTy::Bulk,
            3 => EndpointTy::Interrupt,
            _ => unreachable!(),
        }
    }
}

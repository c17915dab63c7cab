//! Thin wrapper around the Linux raw-gadget character device.
//!
//! Every function here is a single ioctl on `/dev/raw-gadget`; the protocol
//! logic lives in [crate::session] and [crate::main]. The ioctl request
//! codes and argument structs mirror the kernel's UAPI for the interface:
//! this module only owns marshalling, never policy.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;

use bitflags::bitflags;

use crate::usb::endpoint::EndpointDescriptor;
use crate::usb::setup::Setup;

pub const UDC_NAME_LENGTH_MAX: usize = 128;
pub const EPS_NUM_MAX: usize = 30;
pub const EP_NAME_MAX: usize = 16;
/// Controller-chosen endpoint address in a capability entry.
pub const EP_ADDR_ANY: u32 = 0xff;

/// Capacity of a single EP0 transfer. Matches the largest descriptor set the
/// device ever answers with.
pub const EP0_MAX_DATA: usize = 256;

const RAW_GADGET_PATH: &str = "/dev/raw-gadget";

/// Device speeds as declared to the UDC at init (ch9 enum usb_device_speed).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UsbSpeed {
    Low = 1,
    Full = 2,
    High = 3,
}

#[repr(C)]
struct UsbRawInit {
    driver_name: [u8; UDC_NAME_LENGTH_MAX],
    device_name: [u8; UDC_NAME_LENGTH_MAX],
    speed: u8,
}

const EVENT_DATA_MAX: usize = mem::size_of::<Setup>();

#[repr(C)]
#[derive(Clone, Copy)]
struct UsbRawEventHeader {
    ty: u32,
    length: u32,
}

#[repr(C)]
struct UsbRawEventBuf {
    header: UsbRawEventHeader,
    data: [u8; EVENT_DATA_MAX],
}

const EVENT_INVALID: u32 = 0;
const EVENT_CONNECT: u32 = 1;
const EVENT_CONTROL: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct UsbRawEpIoHeader {
    ep: u16,
    flags: u16,
    length: u32,
}

#[repr(C)]
struct UsbRawEpIoBuf {
    header: UsbRawEpIoHeader,
    data: [u8; EP0_MAX_DATA],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct UsbRawEpLimits {
    maxpacket_limit: u16,
    max_streams: u16,
    reserved: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct UsbRawEpInfo {
    name: [u8; EP_NAME_MAX],
    addr: u32,
    caps: u32,
    limits: UsbRawEpLimits,
}

#[repr(C)]
struct UsbRawEpsInfo {
    eps: [UsbRawEpInfo; EPS_NUM_MAX],
}

// Request code construction, as in include/uapi/asm-generic/ioctl.h.
const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const RAW_GADGET_IOC_MAGIC: u8 = b'U';

const fn ioctl_code(direction: u32, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((RAW_GADGET_IOC_MAGIC as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

const IOCTL_INIT: libc::c_ulong = ioctl_code(IOC_WRITE, 0, mem::size_of::<UsbRawInit>());
const IOCTL_RUN: libc::c_ulong = ioctl_code(IOC_NONE, 1, 0);
const IOCTL_EVENT_FETCH: libc::c_ulong =
    ioctl_code(IOC_READ, 2, mem::size_of::<UsbRawEventHeader>());
const IOCTL_EP0_WRITE: libc::c_ulong =
    ioctl_code(IOC_WRITE, 3, mem::size_of::<UsbRawEpIoHeader>());
const IOCTL_EP0_READ: libc::c_ulong =
    ioctl_code(IOC_READ | IOC_WRITE, 4, mem::size_of::<UsbRawEpIoHeader>());
const IOCTL_EP_ENABLE: libc::c_ulong =
    ioctl_code(IOC_WRITE, 5, mem::size_of::<EndpointDescriptor>());
const IOCTL_EP_DISABLE: libc::c_ulong = ioctl_code(IOC_WRITE, 6, mem::size_of::<u32>());
const IOCTL_EP_WRITE: libc::c_ulong = ioctl_code(IOC_WRITE, 7, mem::size_of::<UsbRawEpIoHeader>());
const IOCTL_EP_READ: libc::c_ulong =
    ioctl_code(IOC_READ | IOC_WRITE, 8, mem::size_of::<UsbRawEpIoHeader>());
const IOCTL_CONFIGURE: libc::c_ulong = ioctl_code(IOC_NONE, 9, 0);
const IOCTL_VBUS_DRAW: libc::c_ulong = ioctl_code(IOC_WRITE, 10, mem::size_of::<u32>());
const IOCTL_EPS_INFO: libc::c_ulong = ioctl_code(IOC_READ, 11, mem::size_of::<UsbRawEpsInfo>());
const IOCTL_EP0_STALL: libc::c_ulong = ioctl_code(IOC_NONE, 12, 0);
const IOCTL_EP_SET_HALT: libc::c_ulong = ioctl_code(IOC_WRITE, 13, mem::size_of::<u32>());
const IOCTL_EP_CLEAR_HALT: libc::c_ulong = ioctl_code(IOC_WRITE, 14, mem::size_of::<u32>());
const IOCTL_EP_SET_WEDGE: libc::c_ulong = ioctl_code(IOC_WRITE, 15, mem::size_of::<u32>());

bitflags! {
    /// Transfer types and directions a physical endpoint supports.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct EpCaps: u32 {
        const TYPE_CONTROL = 1 << 0;
        const TYPE_ISO = 1 << 1;
        const TYPE_BULK = 1 << 2;
        const TYPE_INT = 1 << 3;
        const DIR_IN = 1 << 4;
        const DIR_OUT = 1 << 5;
    }
}

/// Address policy of a physical endpoint: either the controller fixes the
/// endpoint number, or the gadget may pick any free one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EpAddr {
    Any,
    Fixed(u8),
}

/// One entry of the controller's endpoint capability table, read-only after
/// connect.
#[derive(Clone, Debug)]
pub struct EndpointCapability {
    pub name: String,
    pub addr: EpAddr,
    pub caps: EpCaps,
    pub maxpacket_limit: u16,
    pub max_streams: u16,
}

/// A device-interface occurrence, typed by the kernel.
#[derive(Clone, Copy, Debug)]
pub enum UdcEvent {
    Connect,
    Control(Setup),
    Other { ty: u32, length: u32 },
}

/// The UDC operations the protocol engine consumes. [RawGadgetHandle] is the
/// production implementation; tests substitute fakes.
pub trait Udc {
    fn event_fetch(&self) -> io::Result<UdcEvent>;

    fn ep0_write(&self, data: &[u8]) -> io::Result<usize>;
    fn ep0_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn ep0_stall(&self) -> io::Result<()>;

    fn ep_enable(&self, desc: &EndpointDescriptor) -> io::Result<u16>;
    fn ep_disable(&self, handle: u16) -> io::Result<()>;
    fn ep_write(&self, handle: u16, data: &[u8]) -> io::Result<usize>;
    fn ep_read(&self, handle: u16, buf: &mut [u8]) -> io::Result<usize>;
    fn ep_set_halt(&self, handle: u16) -> io::Result<()>;
    fn ep_clear_halt(&self, handle: u16) -> io::Result<()>;
    fn ep_set_wedge(&self, handle: u16) -> io::Result<()>;

    fn eps_info(&self) -> io::Result<Vec<EndpointCapability>>;
    fn vbus_draw(&self, power: u32) -> io::Result<()>;
    fn configure(&self) -> io::Result<()>;
}

pub struct RawGadgetHandle {
    file: File,
}

impl RawGadgetHandle {
    pub fn open() -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(RAW_GADGET_PATH)?;
        Ok(Self { file })
    }

    /// Binds the gadget to a UDC driver/device pair and declares its speed.
    pub fn init(&self, speed: UsbSpeed, driver: &str, device: &str) -> io::Result<()> {
        let mut arg = UsbRawInit {
            driver_name: [0; UDC_NAME_LENGTH_MAX],
            device_name: [0; UDC_NAME_LENGTH_MAX],
            speed: speed as u8,
        };
        copy_name(&mut arg.driver_name, driver)?;
        copy_name(&mut arg.device_name, device)?;
        self.ioctl_ptr(IOCTL_INIT, &mut arg as *mut _ as *mut libc::c_void)?;
        Ok(())
    }

    pub fn run(&self) -> io::Result<()> {
        self.ioctl_val(IOCTL_RUN, 0)?;
        Ok(())
    }

    fn ioctl_ptr(&self, request: libc::c_ulong, arg: *mut libc::c_void) -> io::Result<libc::c_int> {
        let rv = unsafe { libc::ioctl(self.file.as_raw_fd(), request, arg) };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rv)
    }

    fn ioctl_val(&self, request: libc::c_ulong, arg: libc::c_int) -> io::Result<libc::c_int> {
        let rv = unsafe { libc::ioctl(self.file.as_raw_fd(), request, arg) };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rv)
    }

    fn ep_io(
        &self,
        request: libc::c_ulong,
        handle: u16,
        data: &[u8],
        read_back: Option<&mut [u8]>,
    ) -> io::Result<usize> {
        assert!(data.len() <= EP0_MAX_DATA);
        let mut io = UsbRawEpIoBuf {
            header: UsbRawEpIoHeader {
                ep: handle,
                flags: 0,
                length: data.len() as u32,
            },
            data: [0; EP0_MAX_DATA],
        };
        io.data[..data.len()].copy_from_slice(data);
        let rv = self.ioctl_ptr(request, &mut io as *mut _ as *mut libc::c_void)?;
        let transferred = rv as usize;
        if let Some(buf) = read_back {
            let n = transferred.min(buf.len());
            buf[..n].copy_from_slice(&io.data[..n]);
        }
        Ok(transferred)
    }
}

fn copy_name(dst: &mut [u8; UDC_NAME_LENGTH_MAX], name: &str) -> io::Result<()> {
    // The kernel expects a NUL-terminated name inside the fixed array.
    if name.len() >= UDC_NAME_LENGTH_MAX {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("UDC name longer than {} bytes: {name}", UDC_NAME_LENGTH_MAX - 1),
        ));
    }
    dst[..name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}

impl Udc for RawGadgetHandle {
    fn event_fetch(&self) -> io::Result<UdcEvent> {
        let mut event = UsbRawEventBuf {
            header: UsbRawEventHeader {
                ty: EVENT_INVALID,
                length: EVENT_DATA_MAX as u32,
            },
            data: [0; EVENT_DATA_MAX],
        };
        self.ioctl_ptr(IOCTL_EVENT_FETCH, &mut event as *mut _ as *mut libc::c_void)?;
        match event.header.ty {
            EVENT_CONNECT => Ok(UdcEvent::Connect),
            EVENT_CONTROL => {
                if (event.header.length as usize) < mem::size_of::<Setup>() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "control event shorter than a SETUP packet",
                    ));
                }
                let setup: &Setup = plain::from_bytes(&event.data)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad SETUP bytes"))?;
                Ok(UdcEvent::Control(*setup))
            }
            ty => Ok(UdcEvent::Other {
                ty,
                length: event.header.length,
            }),
        }
    }

    fn ep0_write(&self, data: &[u8]) -> io::Result<usize> {
        self.ep_io(IOCTL_EP0_WRITE, 0, data, None)
    }

    fn ep0_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(EP0_MAX_DATA);
        let zeroes = [0u8; EP0_MAX_DATA];
        self.ep_io(IOCTL_EP0_READ, 0, &zeroes[..len], Some(buf))
    }

    fn ep0_stall(&self) -> io::Result<()> {
        self.ioctl_val(IOCTL_EP0_STALL, 0)?;
        Ok(())
    }

    fn ep_enable(&self, desc: &EndpointDescriptor) -> io::Result<u16> {
        let mut desc = *desc;
        let handle = self.ioctl_ptr(IOCTL_EP_ENABLE, &mut desc as *mut _ as *mut libc::c_void)?;
        Ok(handle as u16)
    }

    fn ep_disable(&self, handle: u16) -> io::Result<()> {
        self.ioctl_val(IOCTL_EP_DISABLE, handle.into())?;
        Ok(())
    }

    fn ep_write(&self, handle: u16, data: &[u8]) -> io::Result<usize> {
        self.ep_io(IOCTL_EP_WRITE, handle, data, None)
    }

    fn ep_read(&self, handle: u16, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(EP0_MAX_DATA);
        let zeroes = [0u8; EP0_MAX_DATA];
        self.ep_io(IOCTL_EP_READ, handle, &zeroes[..len], Some(buf))
    }

    fn ep_set_halt(&self, handle: u16) -> io::Result<()> {
        self.ioctl_val(IOCTL_EP_SET_HALT, handle.into())?;
        Ok(())
    }

    fn ep_clear_halt(&self, handle: u16) -> io::Result<()> {
        self.ioctl_val(IOCTL_EP_CLEAR_HALT, handle.into())?;
        Ok(())
    }

    fn ep_set_wedge(&self, handle: u16) -> io::Result<()> {
        self.ioctl_val(IOCTL_EP_SET_WEDGE, handle.into())?;
        Ok(())
    }

    fn eps_info(&self) -> io::Result<Vec<EndpointCapability>> {
        let mut info: UsbRawEpsInfo = unsafe { mem::zeroed() };
        let num = self.ioctl_ptr(IOCTL_EPS_INFO, &mut info as *mut _ as *mut libc::c_void)?;
        let num = (num as usize).min(EPS_NUM_MAX);
        Ok(info.eps[..num].iter().map(parse_ep_info).collect())
    }

    fn vbus_draw(&self, power: u32) -> io::Result<()> {
        self.ioctl_val(IOCTL_VBUS_DRAW, power as libc::c_int)?;
        Ok(())
    }

    fn configure(&self) -> io::Result<()> {
        self.ioctl_val(IOCTL_CONFIGURE, 0)?;
        Ok(())
    }
}

fn parse_ep_info(raw: &UsbRawEpInfo) -> EndpointCapability {
    let name_len = raw.name.iter().position(|&b| b == 0).unwrap_or(EP_NAME_MAX);
    EndpointCapability {
        name: String::from_utf8_lossy(&raw.name[..name_len]).into_owned(),
        addr: if raw.addr == EP_ADDR_ANY {
            EpAddr::Any
        } else {
            EpAddr::Fixed(raw.addr as u8)
        },
        caps: EpCaps::from_bits_retain(raw.caps),
        maxpacket_limit: raw.limits.maxpacket_limit,
        max_streams: raw.limits.max_streams,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ioctl_codes_match_the_kernel_uapi() {
        // Spot checks against codes computed from the C definitions.
        assert_eq!(IOCTL_RUN, 0x5501);
        assert_eq!(IOCTL_EP0_STALL, 0x550c);
        // _IOW('U', 0, struct usb_raw_init): 128 + 128 + 1 bytes.
        assert_eq!(IOCTL_INIT, 0x4101_5500);
        // _IOR('U', 2, struct usb_raw_event): two u32 header words.
        assert_eq!(IOCTL_EVENT_FETCH, 0x8008_5502);
        // _IOWR('U', 4, struct usb_raw_ep_io).
        assert_eq!(IOCTL_EP0_READ, 0xc008_5504);
        // _IOW('U', 5, struct usb_endpoint_descriptor): 9 packed bytes.
        assert_eq!(IOCTL_EP_ENABLE, 0x4009_5505);
        // _IOR('U', 11, struct usb_raw_eps_info): 30 entries of 32 bytes.
        assert_eq!(IOCTL_EPS_INFO, 0x83c0_550b);
    }

    #[test]
    fn capability_parsing() {
        let mut raw = UsbRawEpInfo {
            name: [0; EP_NAME_MAX],
            addr: EP_ADDR_ANY,
            caps: (EpCaps::TYPE_INT | EpCaps::TYPE_BULK | EpCaps::DIR_IN).bits(),
            limits: UsbRawEpLimits {
                maxpacket_limit: 1024,
                max_streams: 0,
                reserved: 0,
            },
        };
        raw.name[..5].copy_from_slice(b"ep1in");

        let cap = parse_ep_info(&raw);
        assert_eq!(cap.name, "ep1in");
        assert_eq!(cap.addr, EpAddr::Any);
        assert!(cap.caps.contains(EpCaps::TYPE_INT | EpCaps::DIR_IN));
        assert!(!cap.caps.contains(EpCaps::DIR_OUT));
        assert_eq!(cap.maxpacket_limit, 1024);
    }
}

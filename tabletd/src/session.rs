//! The device-side protocol engine.
//!
//! [DeviceSession] owns everything that changes over the life of a
//! connection: the descriptor catalog (whose interrupt endpoint gets its
//! address during negotiation), the configuration state machine, the
//! endpoint-address allocator, and the one-shot report-generator flag.
//! It classifies each SETUP packet and produces a reply or a stall; requests
//! it has no defined handling for are surfaced as fatal errors.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::catalog::DescriptorCatalog;
use crate::error::{Result, TabletError};
use crate::motion::{MotionState, REPORT_LEN};
use crate::raw_gadget::{EndpointCapability, EpAddr, EpCaps, Udc, EP0_MAX_DATA};
use crate::usb::endpoint::EndpointDescriptor;
use crate::usb::setup::{ClassRequest, RequestKind, Setup, StandardRequest};
use crate::usb::{DescriptorKind, EndpointTy};

/// Delay between interrupt reports. SET_IDLE rates from the host are
/// acknowledged but do not change this period.
const REPORT_PERIOD: Duration = Duration::from_millis(10);

/// Bounded reply buffer for one control transfer. `len` is the staged
/// response length, clamped to the host's wLength before the transfer.
pub struct TransferBuffer {
    pub data: [u8; EP0_MAX_DATA],
    pub len: usize,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self {
            data: [0; EP0_MAX_DATA],
            len: 0,
        }
    }

    pub fn stage(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.data.len() {
            return Err(TabletError::BufferTooSmall {
                needed: bytes.len(),
                available: self.data.len(),
            });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    /// Truncates the staged response to the host-requested maximum. Never
    /// extends it.
    pub fn clamp_to(&mut self, wlength: u16) {
        self.len = self.len.min(wlength as usize);
    }
}

/// Outcome of dispatching one control request. Fatal conditions are not
/// outcomes; they travel as [TabletError].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlOutcome {
    /// A response was staged in the transfer buffer; perform one transfer in
    /// the SETUP-indicated direction.
    Reply,
    /// Reject the request on the control endpoint; a normal protocol answer
    /// the host is expected to handle.
    Stall,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionState {
    Unconfigured,
    Configuring,
    Configured,
}

pub struct DeviceSession {
    catalog: DescriptorCatalog,
    state: ConnectionState,
    /// Capability table from the most recent connect event.
    caps: Vec<EndpointCapability>,
    /// Next endpoint number handed out for address-any capabilities.
    /// Monotonic over the whole session.
    next_ep_addr: u8,
    /// Kernel handle of the enabled interrupt IN endpoint.
    ep_handle: Option<u16>,
    int_in_addr: Option<u8>,
    generator_started: bool,
}

impl DeviceSession {
    pub fn new(catalog: DescriptorCatalog) -> Self {
        Self {
            catalog,
            state: ConnectionState::Unconfigured,
            caps: Vec::new(),
            next_ep_addr: 1,
            ep_handle: None,
            int_in_addr: None,
            generator_started: false,
        }
    }

    /// Records the controller's capability table from a connect event.
    /// Negotiation itself runs later, when the host configures the device.
    pub fn connected(&mut self, caps: Vec<EndpointCapability>) {
        for (i, cap) in caps.iter().enumerate() {
            log::debug!(
                "ep #{i}: name {}, addr {:?}, caps {:?}, maxpacket {}, streams {}",
                cap.name,
                cap.addr,
                cap.caps,
                cap.maxpacket_limit,
                cap.max_streams
            );
        }
        self.caps = caps;
    }

    pub fn assigned_address(&self) -> Option<u8> {
        self.int_in_addr
    }

    pub fn generator_started(&self) -> bool {
        self.generator_started
    }

    /// Classifies one SETUP packet and stages the reply. Returns the fatal
    /// no-response error for requests outside the modeled set.
    pub fn handle_control<T>(
        &mut self,
        udc: &Arc<T>,
        setup: Setup,
        buf: &mut TransferBuffer,
    ) -> Result<ControlOutcome>
    where
        T: Udc + Send + Sync + 'static,
    {
        match setup.classify() {
            RequestKind::Standard(StandardRequest::GetDescriptor {
                kind,
                index,
                language,
            }) => self.get_descriptor(kind, index, language, setup, buf),
            RequestKind::Standard(StandardRequest::SetConfiguration { value }) => {
                log::debug!("SET_CONFIGURATION({value})");
                self.configure(udc.as_ref())?;
                buf.len = 0;
                Ok(ControlOutcome::Reply)
            }
            RequestKind::Standard(StandardRequest::GetInterface) => {
                buf.stage(&[self.catalog.interface.alternate_setting])?;
                Ok(ControlOutcome::Reply)
            }
            RequestKind::Standard(StandardRequest::Other(_)) => {
                Err(TabletError::NoResponse { setup })
            }
            RequestKind::Class(ClassRequest::SetReport) => {
                // The host pushes one byte of output report state; accept it.
                buf.len = 1;
                Ok(ControlOutcome::Reply)
            }
            RequestKind::Class(ClassRequest::SetIdle) => {
                self.start_report_generator(udc)?;
                buf.len = 0;
                Ok(ControlOutcome::Reply)
            }
            RequestKind::Class(ClassRequest::SetProtocol) => {
                buf.len = 0;
                Ok(ControlOutcome::Reply)
            }
            RequestKind::Class(ClassRequest::Other(_))
            | RequestKind::Vendor(_)
            | RequestKind::Reserved(_) => Err(TabletError::NoResponse { setup }),
        }
    }

    fn get_descriptor(
        &mut self,
        kind: DescriptorKind,
        index: u8,
        language: u16,
        setup: Setup,
        buf: &mut TransferBuffer,
    ) -> Result<ControlOutcome> {
        match kind {
            DescriptorKind::Device => {
                buf.stage(self.catalog.device_bytes())?;
                Ok(ControlOutcome::Reply)
            }
            DescriptorKind::DeviceQualifier => {
                buf.stage(self.catalog.qualifier_bytes())?;
                Ok(ControlOutcome::Reply)
            }
            DescriptorKind::Configuration => {
                buf.len = self.catalog.write_configuration(&mut buf.data)?;
                Ok(ControlOutcome::Reply)
            }
            DescriptorKind::Str => match self.catalog.strings.descriptor(index, language) {
                Some(desc) => {
                    buf.stage(&desc)?;
                    Ok(ControlOutcome::Reply)
                }
                None => {
                    log::debug!("unknown string descriptor ({index}, {language:#06x})");
                    Ok(ControlOutcome::Stall)
                }
            },
            DescriptorKind::HidReport => {
                buf.stage(crate::catalog::HID_REPORT_DESCRIPTOR)?;
                Ok(ControlOutcome::Reply)
            }
            DescriptorKind::Interface
            | DescriptorKind::Endpoint
            | DescriptorKind::OtherSpeedConfiguration
            | DescriptorKind::Hid
            | DescriptorKind::HidPhysical
            | DescriptorKind::Other(_) => Err(TabletError::NoResponse { setup }),
        }
    }

    /// The activation sequence behind SET_CONFIGURATION: negotiate and
    /// enable the interrupt IN endpoint, declare the power budget, and mark
    /// the device configured. Re-sent SET_CONFIGURATION requests are
    /// acknowledged without touching the already-enabled endpoint.
    fn configure(&mut self, udc: &dyn Udc) -> Result<()> {
        if self.ep_handle.is_some() {
            return Ok(());
        }
        self.state = ConnectionState::Configuring;

        let addr = negotiate_endpoint(
            &self.caps,
            &mut self.catalog.endpoint,
            &mut self.next_ep_addr,
        )?;
        self.int_in_addr = Some(addr);

        let handle = udc
            .ep_enable(&self.catalog.endpoint)
            .map_err(|err| TabletError::transport("ep_enable", err))?;
        udc.vbus_draw(self.catalog.config.max_power.into())
            .map_err(|err| TabletError::transport("vbus_draw", err))?;
        udc.configure()
            .map_err(|err| TabletError::transport("configure", err))?;

        self.ep_handle = Some(handle);
        self.state = ConnectionState::Configured;
        log::info!("configured, interrupt IN endpoint {addr} (handle {handle})");
        Ok(())
    }

    /// Starts the background report generator. Guarded by a one-shot flag:
    /// hosts re-send SET_IDLE during enumeration retries and the generator
    /// must only ever run once.
    fn start_report_generator<T>(&mut self, udc: &Arc<T>) -> Result<()>
    where
        T: Udc + Send + Sync + 'static,
    {
        if self.generator_started {
            return Ok(());
        }
        let Some(handle) = self.ep_handle else {
            log::warn!("SET_IDLE before SET_CONFIGURATION, not starting reports");
            return Ok(());
        };

        let udc = Arc::clone(udc);
        thread::Builder::new()
            .name("int-in".to_string())
            .spawn(move || {
                let err = report_loop(udc.as_ref(), handle);
                log::error!("report generator: {err}");
                std::process::exit(1);
            })
            .map_err(|err| TabletError::transport("thread spawn", err))?;
        self.generator_started = true;
        Ok(())
    }
}

/// Finds the first controller capability compatible with the logical
/// endpoint and assigns its address in place. Idempotent: an endpoint that
/// already carries a number is left untouched.
fn negotiate_endpoint(
    caps: &[EndpointCapability],
    ep: &mut EndpointDescriptor,
    next_addr: &mut u8,
) -> Result<u8> {
    if ep.number() != 0 {
        return Ok(ep.number());
    }
    for cap in caps {
        if !capability_matches(cap, ep) {
            continue;
        }
        let addr = match cap.addr {
            EpAddr::Any => {
                let addr = *next_addr;
                *next_addr += 1;
                addr
            }
            EpAddr::Fixed(addr) => addr,
        };
        ep.address |= addr;
        log::debug!("endpoint {} assigned to capability {}", addr, cap.name);
        return Ok(addr);
    }
    Err(TabletError::NoCompatibleEndpoint)
}

fn capability_matches(cap: &EndpointCapability, ep: &EndpointDescriptor) -> bool {
    if ep.is_in() && !cap.caps.contains(EpCaps::DIR_IN) {
        return false;
    }
    if !ep.is_in() && !cap.caps.contains(EpCaps::DIR_OUT) {
        return false;
    }
    let wanted = match ep.ty() {
        EndpointTy::Bulk => EpCaps::TYPE_BULK,
        EndpointTy::Interrupt => EpCaps::TYPE_INT,
        // The catalog only ever emits bulk or interrupt endpoints.
        EndpointTy::Ctrl | EndpointTy::Isoch => {
            unreachable!("control and isochronous endpoints are never negotiated")
        }
    };
    if !cap.caps.contains(wanted) {
        return false;
    }
    // A capability that cannot carry a full report is a configuration
    // mismatch, not a candidate.
    cap.maxpacket_limit >= ep.max_packet_size
}

/// The data-plane loop: one report per iteration, forever. Runs on its own
/// thread; a failed transfer is returned to the thread wrapper, which treats
/// it as fatal to the process.
fn report_loop<T: Udc + ?Sized>(udc: &T, ep_handle: u16) -> TabletError {
    let mut motion = MotionState::new();
    loop {
        motion.step();
        let report = motion.sample().pack();
        debug_assert_eq!(report.len(), REPORT_LEN);
        if let Err(err) = udc.ep_write(ep_handle, &report) {
            return TabletError::transport("ep_write", err);
        }
        log::trace!("report {report:02x?}");
        thread::sleep(REPORT_PERIOD);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::raw_gadget::UdcEvent;
    use crate::usb::setup::{hid_req, req};
    use crate::usb::USB_DIR_IN;

    /// Fake UDC that records the activation calls the dispatcher makes.
    /// Event fetching is never exercised here.
    #[derive(Default)]
    struct FakeUdc {
        ops: Mutex<Vec<String>>,
        ep_writes: AtomicUsize,
    }

    impl FakeUdc {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl Udc for FakeUdc {
        fn event_fetch(&self) -> io::Result<UdcEvent> {
            unreachable!("dispatch tests never fetch events");
        }
        fn ep0_write(&self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }
        fn ep0_read(&self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn ep0_stall(&self) -> io::Result<()> {
            self.ops.lock().unwrap().push("ep0_stall".into());
            Ok(())
        }
        fn ep_enable(&self, desc: &EndpointDescriptor) -> io::Result<u16> {
            self.ops
                .lock()
                .unwrap()
                .push(format!("ep_enable addr {:#04x}", desc.address));
            Ok(3)
        }
        fn ep_disable(&self, _handle: u16) -> io::Result<()> {
            unreachable!();
        }
        fn ep_write(&self, _handle: u16, data: &[u8]) -> io::Result<usize> {
            self.ep_writes.fetch_add(1, Ordering::Relaxed);
            Ok(data.len())
        }
        fn ep_read(&self, _handle: u16, _buf: &mut [u8]) -> io::Result<usize> {
            unreachable!();
        }
        fn ep_set_halt(&self, _handle: u16) -> io::Result<()> {
            unreachable!();
        }
        fn ep_clear_halt(&self, _handle: u16) -> io::Result<()> {
            unreachable!();
        }
        fn ep_set_wedge(&self, _handle: u16) -> io::Result<()> {
            unreachable!();
        }
        fn eps_info(&self) -> io::Result<Vec<EndpointCapability>> {
            unreachable!();
        }
        fn vbus_draw(&self, power: u32) -> io::Result<()> {
            self.ops.lock().unwrap().push(format!("vbus_draw {power}"));
            Ok(())
        }
        fn configure(&self) -> io::Result<()> {
            self.ops.lock().unwrap().push("configure".into());
            Ok(())
        }
    }

    fn int_in_caps() -> Vec<EndpointCapability> {
        vec![
            EndpointCapability {
                name: "ep0out".into(),
                addr: EpAddr::Fixed(0),
                caps: EpCaps::TYPE_CONTROL | EpCaps::DIR_OUT,
                maxpacket_limit: 64,
                max_streams: 0,
            },
            EndpointCapability {
                name: "ep1in".into(),
                addr: EpAddr::Any,
                caps: EpCaps::TYPE_BULK | EpCaps::TYPE_INT | EpCaps::DIR_IN,
                maxpacket_limit: 1024,
                max_streams: 0,
            },
        ]
    }

    fn session_with_caps() -> DeviceSession {
        let mut session = DeviceSession::new(DescriptorCatalog::new());
        session.connected(int_in_caps());
        session
    }

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
    fn get_device_descriptor_with_wlength_clamp() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let full = setup(0x80, req::GET_DESCRIPTOR, 0x0100, 0, 18);
        let outcome = session.handle_control(&udc, full, &mut buf).unwrap();
        assert_eq!(outcome, ControlOutcome::Reply);
        buf.clamp_to(full.length);
        assert_eq!(buf.len, 18);

        let truncated = setup(0x80, req::GET_DESCRIPTOR, 0x0100, 0, 8);
        session.handle_control(&udc, truncated, &mut buf).unwrap();
        buf.clamp_to(truncated.length);
        assert_eq!(buf.len, 8);
        assert_eq!(buf.data[0], 18);
    }

    #[test]
    fn get_configuration_descriptor_total_length() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let request = setup(0x80, req::GET_DESCRIPTOR, 0x0200, 0, 255);
        session.handle_control(&udc, request, &mut buf).unwrap();
        assert_eq!(buf.len, 34);
        assert_eq!(u16::from_le_bytes([buf.data[2], buf.data[3]]), 34);
    }

    #[test]
    fn unknown_string_id_stalls() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let request = setup(0x80, req::GET_DESCRIPTOR, 0x0309, 0x0409, 255);
        let outcome = session.handle_control(&udc, request, &mut buf).unwrap();
        assert_eq!(outcome, ControlOutcome::Stall);
    }

    #[test]
    fn unknown_descriptor_kind_is_fatal() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        // BOS descriptor, not part of the catalog.
        let request = setup(0x80, req::GET_DESCRIPTOR, 0x0f00, 0, 255);
        match session.handle_control(&udc, request, &mut buf) {
            Err(TabletError::NoResponse { .. }) => {}
            other => panic!("expected NoResponse, got {other:?}"),
        }
    }

    #[test]
    fn vendor_request_is_fatal_not_stall() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let request = setup(0xc0, 0x51, 0, 0, 16);
        match session.handle_control(&udc, request, &mut buf) {
            Err(TabletError::NoResponse { .. }) => {}
            other => panic!("expected NoResponse, got {other:?}"),
        }
        assert!(udc.ops().is_empty());
    }

    #[test]
    fn set_configuration_activates_once() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let request = setup(0x00, req::SET_CONFIGURATION, 1, 0, 0);
        session.handle_control(&udc, request, &mut buf).unwrap();
        assert_eq!(buf.len, 0);
        assert_eq!(session.assigned_address(), Some(1));
        assert_eq!(
            udc.ops(),
            vec![
                "ep_enable addr 0x81".to_string(),
                "vbus_draw 50".to_string(),
                "configure".to_string(),
            ]
        );

        // A re-sent SET_CONFIGURATION must not re-enable or re-allocate.
        session.handle_control(&udc, request, &mut buf).unwrap();
        assert_eq!(session.assigned_address(), Some(1));
        assert_eq!(udc.ops().len(), 3);
    }

    #[test]
    fn get_interface_returns_alternate_setting() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let request = setup(0x81, req::GET_INTERFACE, 0, 0, 1);
        session.handle_control(&udc, request, &mut buf).unwrap();
        assert_eq!(buf.len, 1);
        assert_eq!(buf.data[0], 0);
    }

    #[test]
    fn set_idle_starts_the_generator_once() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let configure = setup(0x00, req::SET_CONFIGURATION, 1, 0, 0);
        session.handle_control(&udc, configure, &mut buf).unwrap();

        let set_idle = setup(0x21, hid_req::SET_IDLE, 0, 0, 0);
        session.handle_control(&udc, set_idle, &mut buf).unwrap();
        assert!(session.generator_started());

        // Hosts re-send SET_IDLE during enumeration retries; the flag keeps
        // the generator singular.
        session.handle_control(&udc, set_idle, &mut buf).unwrap();
        assert!(session.generator_started());
    }

    #[test]
    fn set_report_acknowledges_one_byte() {
        let udc = Arc::new(FakeUdc::default());
        let mut session = session_with_caps();
        let mut buf = TransferBuffer::new();

        let request = setup(0x21, hid_req::SET_REPORT, 0x0200, 0, 1);
        let outcome = session.handle_control(&udc, request, &mut buf).unwrap();
        assert_eq!(outcome, ControlOutcome::Reply);
        assert_eq!(buf.len, 1);
    }

    #[test]
    fn negotiation_is_idempotent_and_counts_from_one() {
        let caps = int_in_caps();
        let mut next = 1u8;

        let mut first = EndpointDescriptor {
            address: USB_DIR_IN,
            attributes: EndpointTy::Interrupt as u8,
            max_packet_size: 8,
            ..Default::default()
        };
        assert_eq!(
            negotiate_endpoint(&caps, &mut first, &mut next).unwrap(),
            1
        );
        assert_eq!(first.address, USB_DIR_IN | 1);

        // Negotiating an already-assigned endpoint changes nothing.
        assert_eq!(
            negotiate_endpoint(&caps, &mut first, &mut next).unwrap(),
            1
        );
        assert_eq!(next, 2);

        let mut second = EndpointDescriptor {
            address: USB_DIR_IN,
            attributes: EndpointTy::Interrupt as u8,
            max_packet_size: 8,
            ..Default::default()
        };
        assert_eq!(
            negotiate_endpoint(&caps, &mut second, &mut next).unwrap(),
            2
        );
    }

    #[test]
    fn negotiation_respects_fixed_addresses_and_limits() {
        let caps = vec![
            EndpointCapability {
                name: "ep5in".into(),
                addr: EpAddr::Fixed(5),
                caps: EpCaps::TYPE_INT | EpCaps::DIR_IN,
                maxpacket_limit: 64,
                max_streams: 0,
            },
        ];
        let mut next = 1u8;
        let mut ep = EndpointDescriptor {
            address: USB_DIR_IN,
            attributes: EndpointTy::Interrupt as u8,
            max_packet_size: 8,
            ..Default::default()
        };
        assert_eq!(negotiate_endpoint(&caps, &mut ep, &mut next).unwrap(), 5);
        // The counter is reserved for address-any capabilities.
        assert_eq!(next, 1);

        // A capability that cannot carry the 8-byte report is no candidate.
        let tiny = vec![EndpointCapability {
            name: "ep1in".into(),
            addr: EpAddr::Any,
            caps: EpCaps::TYPE_INT | EpCaps::DIR_IN,
            maxpacket_limit: 4,
            max_streams: 0,
        }];
        let mut ep = EndpointDescriptor {
            address: USB_DIR_IN,
            attributes: EndpointTy::Interrupt as u8,
            max_packet_size: 8,
            ..Default::default()
        };
        match negotiate_endpoint(&tiny, &mut ep, &mut next) {
            Err(TabletError::NoCompatibleEndpoint) => {}
            other => panic!("expected NoCompatibleEndpoint, got {other:?}"),
        }
    }

    #[test]
    fn negotiation_without_compatible_capability_fails() {
        let caps = vec![EndpointCapability {
            name: "ep1out".into(),
            addr: EpAddr::Any,
            caps: EpCaps::TYPE_INT | EpCaps::DIR_OUT,
            maxpacket_limit: 64,
            max_streams: 0,
        }];
        let mut next = 1u8;
        let mut ep = EndpointDescriptor {
            address: USB_DIR_IN,
            attributes: EndpointTy::Interrupt as u8,
            max_packet_size: 8,
            ..Default::default()
        };
        match negotiate_endpoint(&caps, &mut ep, &mut next) {
            Err(TabletError::NoCompatibleEndpoint) => {}
            other => panic!("expected NoCompatibleEndpoint, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "never negotiated")]
    fn negotiating_a_control_endpoint_is_a_precondition_violation() {
        let caps = int_in_caps();
        let mut next = 1u8;
        let mut ep = EndpointDescriptor {
            address: USB_DIR_IN,
            attributes: EndpointTy::Ctrl as u8,
            max_packet_size: 64,
            ..Default::default()
        };
        let _ = negotiate_endpoint(&caps, &mut ep, &mut next);
    }
}

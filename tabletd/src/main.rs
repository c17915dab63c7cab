//! tabletd: emulates a USB HID pen tablet through the Linux raw-gadget
//! interface. The pen traces the border of the drawing area clockwise,
//! hovering in range, for as long as the process runs.

use std::env;
use std::process;
use std::sync::Arc;

use crate::catalog::DescriptorCatalog;
use crate::error::{Result, TabletError};
use crate::raw_gadget::{RawGadgetHandle, Udc, UdcEvent, UsbSpeed};
use crate::session::{ControlOutcome, DeviceSession, TransferBuffer};
use crate::usb::setup::ReqDirection;

mod catalog;
mod error;
mod motion;
mod raw_gadget;
mod session;
mod usb;

const USAGE: &str = "tabletd [device] [driver]";

fn main() {
    let mut args = env::args().skip(1);
    let device = args.next().unwrap_or_else(|| "dummy_udc.0".to_string());
    let driver = args.next().unwrap_or_else(|| "dummy_udc".to_string());
    if args.next().is_some() {
        eprintln!("usage: {USAGE}");
        process::exit(2);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(&device, &driver) {
        log::error!("{err}");
        process::exit(1);
    }
}

fn run(device: &str, driver: &str) -> Result<()> {
    let udc = RawGadgetHandle::open()
        .map_err(|err| TabletError::transport("open", err))?;
    udc.init(UsbSpeed::High, driver, device)
        .map_err(|err| TabletError::transport("init", err))?;
    udc.run()
        .map_err(|err| TabletError::transport("run", err))?;
    log::info!("gadget bound to {device} via {driver}");

    let udc = Arc::new(udc);
    let mut session = DeviceSession::new(DescriptorCatalog::new());
    event_loop(&udc, &mut session)
}

/// The control-plane loop: fetch one UDC event, dispatch it, repeat.
/// Only a transport or dispatch error ends it.
fn event_loop<T>(udc: &Arc<T>, session: &mut DeviceSession) -> Result<()>
where
    T: Udc + Send + Sync + 'static,
{
    let mut buf = TransferBuffer::new();
    loop {
        let event = udc
            .event_fetch()
            .map_err(|err| TabletError::transport("event_fetch", err))?;
        match event {
            UdcEvent::Connect => {
                let caps = udc
                    .eps_info()
                    .map_err(|err| TabletError::transport("eps_info", err))?;
                log::info!("connected, {} controller endpoints", caps.len());
                session.connected(caps);
            }
            UdcEvent::Control(setup) => {
                log::trace!("control {setup:?}");
                match session.handle_control(udc, setup, &mut buf)? {
                    ControlOutcome::Stall => {
                        udc.ep0_stall()
                            .map_err(|err| TabletError::transport("ep0_stall", err))?;
                    }
                    ControlOutcome::Reply => {
                        buf.clamp_to(setup.length);
                        match setup.direction() {
                            ReqDirection::DeviceToHost => {
                                udc.ep0_write(&buf.data[..buf.len])
                                    .map_err(|err| TabletError::transport("ep0_write", err))?;
                            }
                            ReqDirection::HostToDevice => {
                                udc.ep0_read(&mut buf.data[..buf.len])
                                    .map_err(|err| TabletError::transport("ep0_read", err))?;
                            }
                        }
                    }
                }
            }
            UdcEvent::Other { ty, length } => {
                log::trace!("ignoring event type {ty} ({length} bytes)");
            }
        }
    }
}

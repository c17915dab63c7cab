//! Synthetic pen motion and interrupt report packing.
//!
//! The pen walks a rectangular path just inside the perimeter of the active
//! area, turning clockwise whenever it reaches the inner margin.

/// Logical area width, matching the report descriptor's X maximum.
pub const AREA_WIDTH: u16 = 16000;
/// Logical area height, matching the report descriptor's Y maximum.
pub const AREA_HEIGHT: u16 = 9000;
/// Inner margin the pen keeps from every edge.
pub const BORDER: u16 = 2000;
/// Distance covered per report.
pub const STEP_SIZE: u16 = 100;

pub const REPORT_ID: u8 = 6;
/// Interrupt reports are always exactly this long.
pub const REPORT_LEN: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Right,
    Down,
    Left,
    Up,
}

/// One sample of the emulated pen sensor, packed into a single interrupt
/// report and then discarded.
#[derive(Clone, Copy, Debug)]
pub struct PenReport {
    pub id: u8,
    pub tip: bool,
    pub barrel: bool,
    pub eraser: bool,
    pub invert: bool,
    pub in_range: bool,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
}

impl PenReport {
    /// Packs the sample to the wire layout declared by the report
    /// descriptor: report id, a flag byte (tip bit 0, barrel bit 1, eraser
    /// bit 2, invert bit 3, bit 4 reserved, in-range bit 5), then X, Y and
    /// pressure as little-endian 16-bit fields.
    pub fn pack(&self) -> [u8; REPORT_LEN] {
        let flags = (self.tip as u8)
            | (self.barrel as u8) << 1
            | (self.eraser as u8) << 2
            | (self.invert as u8) << 3
            | (self.in_range as u8) << 5;
        let x = self.x.to_le_bytes();
        let y = self.y.to_le_bytes();
        let pressure = self.pressure.to_le_bytes();
        [
            self.id, flags, x[0], x[1], y[0], y[1], pressure[0], pressure[1],
        ]
    }
}

/// Current pen position and heading, advanced once per report.
#[derive(Clone, Copy, Debug)]
pub struct MotionState {
    x: u16,
    y: u16,
    direction: Direction,
}

impl MotionState {
    pub fn new() -> Self {
        Self {
            x: BORDER,
            y: BORDER,
            direction: Direction::Right,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Moves one step in the current direction, turning clockwise when the
    /// inner margin is reached.
    pub fn step(&mut self) {
        match self.direction {
            Direction::Right => {
                self.x += STEP_SIZE;
                if self.x >= AREA_WIDTH - BORDER {
                    self.direction = Direction::Down;
                }
            }
            Direction::Down => {
                self.y += STEP_SIZE;
                if self.y >= AREA_HEIGHT - BORDER {
                    self.direction = Direction::Left;
                }
            }
            Direction::Left => {
                self.x -= STEP_SIZE;
                if self.x <= BORDER {
                    self.direction = Direction::Up;
                }
            }
            Direction::Up => {
                self.y -= STEP_SIZE;
                if self.y <= BORDER {
                    self.direction = Direction::Right;
                }
            }
        }
    }

    /// The report for the current position: hovering in range, no switches
    /// pressed, no pressure.
    pub fn sample(&self) -> PenReport {
        PenReport {
            id: REPORT_ID,
            tip: false,
            barrel: false,
            eraser: false,
            invert: false,
            in_range: true,
            x: self.x,
            y: self.y,
            pressure: 0,
        }
    }
}

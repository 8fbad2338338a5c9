//! Port configuration value type.
//!
//! A [`PortConfig`] is a snapshot: read it from the device, change the fields
//! you care about, and write the whole thing back with
//! [`SerialPort::set_config`](super::SerialPort::set_config).

use serde::{Deserialize, Serialize};

/// Serial line parameters of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// RTS line behaviour.
    pub rts: Rts,

    /// CTS line behaviour.
    pub cts: Cts,

    /// DTR line behaviour.
    pub dtr: Dtr,

    /// DSR line behaviour.
    pub dsr: Dsr,

    /// Software flow control directions.
    pub xon_xoff: XonXoff,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            rts: Rts::On,
            cts: Cts::Ignore,
            dtr: Dtr::On,
            dsr: Dsr::Ignore,
            xon_xoff: XonXoff::Disabled,
        }
    }
}

impl PortConfig {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set RTS/CTS, DTR/DSR and XON/XOFF together for one flow control mode.
    pub fn with_flow_control(mut self, flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => {
                self.rts = Rts::On;
                self.cts = Cts::Ignore;
                self.dtr = Dtr::On;
                self.dsr = Dsr::Ignore;
                self.xon_xoff = XonXoff::Disabled;
            }
            FlowControl::Software => {
                self.rts = Rts::On;
                self.cts = Cts::Ignore;
                self.dtr = Dtr::On;
                self.dsr = Dsr::Ignore;
                self.xon_xoff = XonXoff::InOut;
            }
            FlowControl::Hardware => {
                self.rts = Rts::FlowControl;
                self.cts = Cts::FlowControl;
                self.dtr = Dtr::On;
                self.dsr = Dsr::Ignore;
                self.xon_xoff = XonXoff::Disabled;
            }
            FlowControl::DtrDsr => {
                self.rts = Rts::On;
                self.cts = Cts::Ignore;
                self.dtr = Dtr::FlowControl;
                self.dsr = Dsr::FlowControl;
                self.xon_xoff = XonXoff::Disabled;
            }
        }
        self
    }

    /// The flow control mode implied by the individual line settings.
    pub fn flow_control(&self) -> FlowControl {
        if self.xon_xoff != XonXoff::Disabled {
            FlowControl::Software
        } else if self.rts == Rts::FlowControl || self.cts == Cts::FlowControl {
            FlowControl::Hardware
        } else if self.dtr == Dtr::FlowControl || self.dsr == Dsr::FlowControl {
            FlowControl::DtrDsr
        } else {
            FlowControl::None
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<serialport::DataBits> for DataBits {
    fn from(bits: serialport::DataBits) -> Self {
        match bits {
            serialport::DataBits::Five => DataBits::Five,
            serialport::DataBits::Six => DataBits::Six,
            serialport::DataBits::Seven => DataBits::Seven,
            serialport::DataBits::Eight => DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
    DtrDsr,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            // serialport has no DTR/DSR mode; the lines are driven manually instead.
            FlowControl::None | FlowControl::DtrDsr => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<serialport::Parity> for Parity {
    fn from(parity: serialport::Parity) -> Self {
        match parity {
            serialport::Parity::None => Parity::None,
            serialport::Parity::Odd => Parity::Odd,
            serialport::Parity::Even => Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<serialport::StopBits> for StopBits {
    fn from(bits: serialport::StopBits) -> Self {
        match bits {
            serialport::StopBits::One => StopBits::One,
            serialport::StopBits::Two => StopBits::Two,
        }
    }
}

/// RTS pin behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rts {
    Off,
    On,
    FlowControl,
}

/// CTS pin behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cts {
    Ignore,
    FlowControl,
}

/// DTR pin behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtr {
    Off,
    On,
    FlowControl,
}

/// DSR pin behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dsr {
    Ignore,
    FlowControl,
}

/// XON/XOFF flow control directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XonXoff {
    Disabled,
    In,
    Out,
    InOut,
}

//! Getting rotation commands to the rig without ever waiting on it.
//!
//! An [InstructionSink] accepts [Instruction]s and returns immediately; the
//! actual I/O happens elsewhere (a writer thread for [SerialTransport]).
//! [RotationChannel] pairs a sink with the [OrientationStore] so the model of
//! the rig moves together with the commands sent to it.

use log::{debug, error, info, warn};
use serial2::SerialPort;
use std::{
    borrow::Cow,
    fmt::{self, Display},
    path::Path,
    sync::mpsc,
    thread,
};

use crate::{
    instruction::Instruction,
    orientation::{OrientationStore, Rotation},
};

/// Default baud rate of the rig's controller.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

#[derive(Debug)]
pub enum TransportError {
    /// Opening or configuring the port failed.
    IoError(std::io::Error),
    /// The writer side is gone, nothing sent will reach the rig.
    Disconnected,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            TransportError::IoError(error) => Cow::from(format!("io error: {}", error)),
            TransportError::Disconnected => Cow::from("transport is disconnected"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl<T> From<mpsc::SendError<T>> for TransportError {
    fn from(_: mpsc::SendError<T>) -> Self {
        Self::Disconnected
    }
}

/// Fire-and-forget destination for rig instructions. Implementations must
/// not block on the hardware.
pub trait InstructionSink: Send {
    fn send_instruction(&self, instruction: Instruction) -> Result<(), TransportError>;
}

// Handy for tests and for teeing instructions to another consumer.
impl InstructionSink for mpsc::Sender<Instruction> {
    fn send_instruction(&self, instruction: Instruction) -> Result<(), TransportError> {
        Ok(self.send(instruction)?)
    }
}

enum Signal {
    Write(Instruction),
    Stop,
}

/// Sends instructions to the rig over a serial port from a dedicated writer
/// thread.
pub struct SerialTransport {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
}

impl SerialTransport {
    /// Opens `device` at `baud_rate` and starts the writer thread.
    pub fn open(device: impl AsRef<Path>, baud_rate: u32) -> Result<Self, TransportError> {
        let device = device.as_ref();
        let port = SerialPort::open(device, baud_rate)?;
        info!("opened rig port {} at {} baud", device.display(), baud_rate);

        let (tx, rx) = mpsc::channel::<Signal>();
        let handle = thread::spawn(move || {
            while let Ok(Signal::Write(instruction)) = rx.recv() {
                let line = instruction.encode();
                match port.write_all(line.as_bytes()) {
                    Ok(()) => debug!("sent {:?}", line.trim_end()),
                    Err(e) => error!("failed to write {:?} to the rig: {}", line.trim_end(), e),
                }
            }
            debug!("serial writer stopped");
        });

        Ok(SerialTransport {
            handle: Some(handle),
            tx,
        })
    }

    /// Lists the serial devices a rig could be attached to.
    pub fn available_ports() -> Result<Vec<std::path::PathBuf>, TransportError> {
        Ok(SerialPort::available_ports()?)
    }

    /// Stops the writer thread once everything queued so far is written.
    pub fn stop(&mut self) {
        // The thread may already be gone if the port died, that is fine.
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("serial writer thread panicked");
            }
        }
    }
}

impl InstructionSink for SerialTransport {
    fn send_instruction(&self, instruction: Instruction) -> Result<(), TransportError> {
        Ok(self.tx.send(Signal::Write(instruction))?)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pairs the hardware sink with the orientation model.
pub struct RotationChannel {
    sink: Box<dyn InstructionSink>,
    orientation: OrientationStore,
}

impl RotationChannel {
    pub fn new(sink: Box<dyn InstructionSink>, orientation: OrientationStore) -> Self {
        Self { sink, orientation }
    }

    /// A handle onto the orientation this channel keeps up to date.
    pub fn orientation(&self) -> &OrientationStore {
        &self.orientation
    }

    /// The current modelled orientation of the rig.
    pub fn get_rotation(&self) -> Rotation {
        self.orientation.get_rotation()
    }

    /// Tells the rig to move to `rotation` and records it as the rig's new
    /// orientation. When the instruction cannot be handed to the transport,
    /// the model is left untouched.
    pub fn rotate_to(&self, rotation: Rotation) -> Result<(), TransportError> {
        self.sink.send_instruction(Instruction::Rot(rotation))?;
        self.orientation.set_rotation(rotation);
        Ok(())
    }

    /// Asks the rig to home itself. The model is reset to the rest position.
    pub fn calibrate(&self) -> Result<(), TransportError> {
        self.sink.send_instruction(Instruction::Calibrate)?;
        self.orientation.set_rotation(Rotation::default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_sends_and_updates_model() {
        let (tx, rx) = mpsc::channel::<Instruction>();
        let channel = RotationChannel::new(Box::new(tx), OrientationStore::new());

        channel.rotate_to(Rotation::new(1.8, -0.5, 0.0)).unwrap();

        assert_eq!(
            rx.try_recv(),
            Ok(Instruction::Rot(Rotation::new(1.8, -0.5, 0.0)))
        );
        assert_eq!(channel.get_rotation(), Rotation::new(1.8, -0.5, 0.0));
    }

    #[test]
    fn dead_transport_leaves_model_alone() {
        let (tx, rx) = mpsc::channel::<Instruction>();
        drop(rx);
        let store = OrientationStore::with_rotation(Rotation::new(5.0, 5.0, 0.0));
        let channel = RotationChannel::new(Box::new(tx), store.clone());

        assert!(matches!(
            channel.rotate_to(Rotation::new(9.0, 9.0, 0.0)),
            Err(TransportError::Disconnected)
        ));
        assert_eq!(store.get_rotation(), Rotation::new(5.0, 5.0, 0.0));
    }

    #[test]
    fn calibrate_resets_model() {
        let (tx, rx) = mpsc::channel::<Instruction>();
        let store = OrientationStore::with_rotation(Rotation::new(5.0, 5.0, 5.0));
        let channel = RotationChannel::new(Box::new(tx), store.clone());

        channel.calibrate().unwrap();

        assert_eq!(rx.try_recv(), Ok(Instruction::Calibrate));
        assert_eq!(store.get_rotation(), Rotation::default());
    }
}

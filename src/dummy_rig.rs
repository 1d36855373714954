//! A stand-in for the sphere's controller, used when no hardware is attached.
//!
//! The dummy receives the same text lines the serial port would, decodes them
//! with [Instruction]'s parser and slews its own "physical" orientation toward
//! the commanded one at a bounded speed, like the real motors would.

use log::{debug, warn};
use std::{
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    instruction::Instruction,
    orientation::{Degree, OrientationStore, Rotation},
    rotation_channel::{InstructionSink, TransportError},
};

const TICK: Duration = Duration::from_millis(10);

enum Signal {
    Line(String),
    Stop,
}

pub struct DummyRig {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    physical: OrientationStore,
}

impl DummyRig {
    /// Starts a rig whose axes move at most `speed` degrees per second.
    pub fn new(speed: Degree) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let physical = OrientationStore::new();
        let th_physical = physical.clone();

        let handle = thread::spawn(move || {
            let mut target = Rotation::default();
            let mut last_tick = Instant::now();
            loop {
                match rx.recv_timeout(TICK) {
                    Ok(Signal::Line(line)) => match line.parse::<Instruction>() {
                        Ok(Instruction::Rot(rotation)) => {
                            debug!("dummy rig heading to {}", rotation);
                            target = rotation;
                        }
                        Ok(Instruction::Calibrate) => {
                            debug!("dummy rig calibrating");
                            target = Rotation::default();
                            th_physical.set_rotation(target);
                        }
                        Err(e) => warn!("dummy rig could not decode {:?}: {:?}", line, e),
                    },
                    Ok(Signal::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }

                let elapsed = last_tick.elapsed().as_secs_f64();
                last_tick = Instant::now();
                let max_step = speed * elapsed;
                let current = th_physical.get_rotation();
                th_physical.set_rotation(Rotation::new(
                    step_toward(current.theta, target.theta, max_step),
                    step_toward(current.phi, target.phi, max_step),
                    step_toward(current.roll, target.roll, max_step),
                ));
            }
        });

        DummyRig {
            handle: Some(handle),
            tx,
            physical,
        }
    }

    /// Where the dummy's motors actually are right now, as opposed to where
    /// they were last told to go.
    pub fn physical_rotation(&self) -> Rotation {
        self.physical.get_rotation()
    }

    /// A read handle on the physical orientation, for simulated cameras.
    pub fn physical_handle(&self) -> OrientationStore {
        self.physical.clone()
    }

    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        // Same `Option`/`take()` dance as any other owned worker thread, so
        // the handle can be joined from behind `&mut self`.
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("dummy rig thread panicked");
            }
        }
    }
}

impl InstructionSink for DummyRig {
    fn send_instruction(&self, instruction: Instruction) -> Result<(), TransportError> {
        Ok(self.tx.send(Signal::Line(instruction.encode()))?)
    }
}

impl Drop for DummyRig {
    fn drop(&mut self) {
        self.stop();
    }
}

fn step_toward(current: Degree, target: Degree, max_step: Degree) -> Degree {
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_bounded() {
        assert_eq!(step_toward(0.0, 10.0, 2.5), 2.5);
        assert_eq!(step_toward(0.0, -10.0, 2.5), -2.5);
        assert_eq!(step_toward(9.0, 10.0, 2.5), 10.0);
    }

    #[test]
    fn dummy_reaches_commanded_rotation() {
        let rig = DummyRig::new(1000.0);
        rig.send_instruction(Instruction::Rot(Rotation::new(3.0, -2.0, 0.0)))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.physical_rotation() != Rotation::new(3.0, -2.0, 0.0) {
            assert!(Instant::now() < deadline, "dummy rig never arrived");
            thread::sleep(TICK);
        }
    }
}

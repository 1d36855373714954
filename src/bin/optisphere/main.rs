//! The OptiSphere command line: keep a target centered with the rig, or look
//! at what an earlier session saved.

// Example:
// RUST_LOG=info cargo run -- track --simulate --target 2.5 1.5 --drift 0.01 0

use clap::Parser;
use log::{info, warn};
use optisphere::{
    args::{CommandTask, InspectCommand, SphereArgs, TrackCommand},
    camera::{FrameSource, FrameWorker, ImageSequence, SyntheticScene},
    config::SphereConfig,
    dummy_rig::DummyRig,
    frame::{BoundingBox, FrameDimension},
    gui::{
        device_selector, rig_choices, tracking_monitor, Dispatcher, MonitorError, RigDevice,
        RoiCursor,
    },
    manual_rotation::ManualRotation,
    orientation::OrientationStore,
    recorder::{load_record, RecordError, TrajectoryRecorder},
    roi_tracker::{CorrelationTracker, RoiTracker},
    rotation_channel::{InstructionSink, RotationChannel, SerialTransport, TransportError},
    session::SessionMetadata,
    session_machine::SessionMachine,
    workflow::WorkflowLock,
};
use std::{error::Error, process::ExitCode, sync::mpsc};

fn main() -> ExitCode {
    env_logger::init();
    let args = SphereArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("optisphere: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: SphereArgs) -> Result<(), Box<dyn Error>> {
    let mut config = SphereConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    match &args.command {
        CommandTask::Track(track) => track_target(&config, track)?,
        CommandTask::Inspect(inspect) => inspect_record(inspect)?,
        CommandTask::Ports => list_ports()?,
    }
    Ok(())
}

/// A `size` box around `center`, kept inside the frame.
fn box_around(center: (f64, f64), size: (u32, u32), dim: FrameDimension) -> BoundingBox {
    let (w, h) = (size.0.min(dim.width), size.1.min(dim.height));
    let x = (center.0 - w as f64 / 2.0).clamp(0.0, (dim.width - w) as f64);
    let y = (center.1 - h as f64 / 2.0).clamp(0.0, (dim.height - h) as f64);
    BoundingBox::new(x as u32, y as u32, w, h)
}

fn track_target(config: &SphereConfig, track: &TrackCommand) -> Result<(), MonitorError> {
    let device = match (&track.device, track.simulate) {
        (Some(path), _) => RigDevice::Serial(path.clone()),
        (None, true) => RigDevice::Simulated,
        (None, false) => {
            let ports = SerialTransport::available_ports()?;
            match device_selector(rig_choices(ports))? {
                Some(device) => device,
                None => {
                    info!("no rig selected");
                    return Ok(());
                }
            }
        }
    };

    // The simulated camera looks through the physical rig, which lags behind
    // the model while it slews.
    let model = OrientationStore::new();
    let (sink, camera_rig): (Box<dyn InstructionSink>, OrientationStore) = match &device {
        RigDevice::Serial(path) => (
            Box::new(SerialTransport::open(path, config.baud_rate)?),
            model.clone(),
        ),
        RigDevice::Simulated => {
            let rig = DummyRig::new(config.rig_speed);
            let physical = rig.physical_handle();
            (Box::new(rig), physical)
        }
    };
    info!("driving the {}", device);

    let (source, initial_roi): (Box<dyn FrameSource>, Option<BoundingBox>) = match &track.frames {
        Some(dir) => (Box::new(ImageSequence::open(dir, true)?), track.roi()),
        None => {
            let scene = SyntheticScene::new(
                config.frame_dimension(),
                camera_rig,
                config.pix_deg_ratio,
                track.target(),
            )
            .with_drift(track.drift())
            .with_noise(config.camera_noise, rand::random())
            .with_target_size(config.roi_size.0.min(config.roi_size.1) / 2);
            let around_target =
                box_around(scene.target_center(), config.roi_size, config.frame_dimension());
            (Box::new(scene), track.roi().or(Some(around_target)))
        }
    };

    let channel = RotationChannel::new(sink, model);
    channel.calibrate()?;

    let lock = WorkflowLock::new();
    let tracker_params = config.tracker;
    let mut machine = SessionMachine::new(
        channel,
        lock.clone(),
        TrajectoryRecorder::new(&config.recovery_dir),
        Box::new(move || -> Box<dyn RoiTracker> { Box::new(CorrelationTracker::new(tracker_params)) }),
        config.session_params(),
    )
    .with_min_points(config.min_persisted_points);
    machine.set_metadata(SessionMetadata {
        mode: config.mode,
        description: track.description.clone(),
    });

    let (event_tx, event_rx) = mpsc::channel();
    let mut worker = FrameWorker::start(source, config.camera_fps, event_tx);
    let dispatcher = Dispatcher::new(machine, ManualRotation::new(lock));
    let summary = tracking_monitor(
        dispatcher,
        event_rx,
        RoiCursor::new(initial_roi, config.roi_size),
    );
    worker.stop();
    let summary = summary?;

    for (title, record) in &summary.saved {
        println!(
            "{}: {} points saved in {}",
            title,
            record.nb_points,
            record.directory.display()
        );
    }
    for (metadata, track) in &summary.unsaved {
        warn!("a {} session could not be saved", metadata.mode);
        println!("unsaved session ({} samples):", track.len());
        for sample in track.samples() {
            println!("  {}", sample);
        }
    }
    Ok(())
}

fn inspect_record(inspect: &InspectCommand) -> Result<(), RecordError> {
    let (record, track) = load_record(&inspect.directory)?;

    println!(
        "{}: {} points, {}",
        record.name, record.nb_points, record.metadata.mode
    );
    if !record.metadata.description.is_empty() {
        println!("{}", record.metadata.description);
    }
    for sample in track.samples() {
        println!("  {}", sample);
    }
    Ok(())
}

fn list_ports() -> Result<(), TransportError> {
    let ports = SerialTransport::available_ports()?;
    if ports.is_empty() {
        println!("No serial devices found");
    }
    for port in ports {
        println!("{}", port.display());
    }
    Ok(())
}

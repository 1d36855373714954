//! OptiSphere drives a motorized spherical rig that carries a camera. The
//! user selects a region of interest in the camera picture, and from then on
//! every frame is run through a visual tracker: whenever the target drifts
//! too far from the middle of the picture the rig is turned to bring it back.
//! Every correction is recorded as a spherical coordinate with a timestamp,
//! and the resulting trajectory is saved when tracking stops.
//!
//! The pipeline, from the camera to the disk:
//!
//! - [camera] produces frames and paces them on a worker thread,
//! - [roi_tracker] finds the selected region in every frame,
//! - [centering] decides when and how far to turn the rig,
//! - [rotation_channel] hands the rotation to the hardware without waiting
//!   on it and keeps the [orientation] model in step,
//! - [recorder] writes finished sessions to disk,
//! - [session_machine] owns all of the above for one camera and serializes
//!   everything that happens to it through a single event dispatcher.
//!
//! The rig is shared with manual rotation and scanning, [workflow] makes sure
//! only one of them moves it at a time.

#![warn(missing_docs)]
pub mod args;
pub mod camera;
pub mod centering;
pub mod config;
pub mod dummy_rig;
pub mod frame;
pub mod gui;
pub mod instruction;
pub mod manual_rotation;
pub mod orientation;
pub mod recorder;
pub mod roi_tracker;
pub mod rotation_channel;
pub mod session;
pub mod session_machine;
pub mod tracking_sample;
pub mod workflow;

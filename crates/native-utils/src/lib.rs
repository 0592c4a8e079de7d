//! cpal glue: device lookup, a microphone source and a speaker driving the mixer.
pub mod device;
pub mod microphone;
pub mod speaker;

//! Silicon model of the Monitor power/trace acquisition IP.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure description of the IP block and of the character-device contract
//! exposed by the `monitor` kernel module: register offsets, command and
//! status bits, BRAM base addresses, mmap page indices, ioctl numbers and
//! poll event bits.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Control window layout, command bits, status bits |
//! | [`bram`] | Sample element sizes and the 16-byte transfer rule |
//! | [`platform`] | BRAM base addresses, device nodes, CMS window per board |
//! | [`contract`] | mmap page indices, ioctl magic/numbers, poll bits |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bram;
pub mod contract;
pub mod platform;
pub mod regs;

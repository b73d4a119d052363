// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

pub mod cases;
pub mod coordinator;
pub mod error;
pub mod ihex;
pub mod lifecycle;
pub mod session;
pub mod target;
pub mod toolchain;
pub mod transport;
pub mod trigger;

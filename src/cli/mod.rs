// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! CLI subcommands for `cutout-cli`.
//!
//! ```bash
//! cutout-cli devices            # List detected compute devices
//! cutout-cli selftest [N]       # Run N synthetic jobs through the scheduler
//! cutout-cli config show        # Effective configuration
//! ```

pub mod config_cmd;
pub mod devices_cmd;

pub use devices_cmd::{run_devices, run_selftest};

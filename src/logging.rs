// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use env_logger::Env;
use std::io::Write;

/// Installs the global logger, honouring `RUST_LOG` and defaulting to `info`.
pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{:>5} [{}] - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

/// Logger for tests: output is captured per test and repeated calls are fine.
pub fn try_init_for_testing() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

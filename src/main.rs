// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `rask-gateway` entry point: loads the config file named as the sole
//! command-line argument and runs the gateway until `SIGTERM`.

use std::process::ExitCode;

use rask_gateway::config::Config;
use rask_gateway::server::Gateway;

fn main() -> ExitCode {
    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: rask-gateway <config-path>");
        return ExitCode::FAILURE;
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {config_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match Gateway::new(config) {
        Ok(gateway) => gateway,
        Err(err) => {
            eprintln!("failed to initialize gateway: {err}");
            return ExitCode::FAILURE;
        }
    };

    match gateway.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gateway exited with error: {err}");
            ExitCode::FAILURE
        }
    }
}

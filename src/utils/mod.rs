// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

pub mod command_timeout;
pub mod logging;
pub mod system;
pub mod uds;

pub use command_timeout::{run_command_with_timeout, run_shell_with_timeout};
pub use system::{format_uuid, get_hostname, get_node_name, is_kubernetes, pcie_base_address};

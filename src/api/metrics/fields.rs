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

//! Static table of every exported gauge family.
//!
//! The config field name of a family is its metric name upper-cased, e.g.
//! `gpu_ecc_uncorrect_gfx` is enabled by `GPU_ECC_UNCORRECT_GFX`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Carries host-level labels only.
    Host,
    /// One series per device, plus index dimensions.
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub scope: Scope,
    /// Index dimensions inserted between policy labels and custom labels.
    pub index: &'static [&'static str],
    /// Counter name reported by the profiler helper, for profiler fields.
    pub profiler: Option<&'static str>,
}

impl FieldSpec {
    /// Canonical config field name.
    pub fn field_name(&self) -> String {
        self.name.to_uppercase()
    }

    pub fn is_profiler(&self) -> bool {
        self.profiler.is_some()
    }
}

macro_rules! device {
    ($name:expr, $help:expr) => {
        FieldSpec {
            name: $name,
            help: $help,
            scope: Scope::Device,
            index: &[],
            profiler: None,
        }
    };
    ($name:expr, $help:expr, [$($dim:literal),+]) => {
        FieldSpec {
            name: $name,
            help: $help,
            scope: Scope::Device,
            index: &[$($dim),+],
            profiler: None,
        }
    };
}

macro_rules! profiler {
    ($name:expr, $alias:expr, $help:expr) => {
        FieldSpec {
            name: $name,
            help: $help,
            scope: Scope::Device,
            index: &[],
            profiler: Some($alias),
        }
    };
}

pub const GPU_NODES_TOTAL: &str = "gpu_nodes_total";
pub const GPU_HEALTH: &str = "gpu_health";

pub static FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: GPU_NODES_TOTAL,
        help: "Number of GPUs in the node",
        scope: Scope::Host,
        index: &[],
        profiler: None,
    },
    device!("gpu_package_power", "Current socket power in Watts"),
    device!("gpu_average_package_power", "Average socket power in Watts"),
    device!("gpu_edge_temperature", "Current edge temperature in Celsius"),
    device!(
        "gpu_junction_temperature",
        "Current junction/hotspot temperature in Celsius"
    ),
    device!("gpu_memory_temperature", "Current memory temperature in Celsius"),
    device!(
        "gpu_hbm_temperature",
        "List of current HBM temperatures in Celsius",
        ["hbm_index"]
    ),
    device!("gpu_gfx_activity", "Graphics engine usage in Percentage (0-100)"),
    device!("gpu_umc_activity", "Memory engine usage in Percentage (0-100)"),
    device!(
        "gpu_mma_activity",
        "Average MultiMedia (MM) engine usage in Percentage (0-100)"
    ),
    device!(
        "gpu_vcn_activity",
        "List of Video Core Next (VCN) encode/decode usage in percentage",
        ["vcn_index"]
    ),
    device!(
        "gpu_jpeg_activity",
        "List of JPEG engine usage in Percentage (0-100)",
        ["jpeg_index"]
    ),
    device!("gpu_voltage", "Current SoC voltage in mV"),
    device!("gpu_gfx_voltage", "Current gfx voltage in mV"),
    device!("gpu_memory_voltage", "Current memory voltage in mV"),
    device!("pcie_speed", "Current PCIe speed in GT/s"),
    device!("pcie_max_speed", "Maximum PCIe speed in GT/s"),
    device!("pcie_bandwidth", "Current PCIe bandwidth in Mb/s"),
    device!("gpu_energy_consumed", "Accumulated energy consumed by the GPU in uJ"),
    device!("pcie_replay_count", "Total number of PCIe replays"),
    device!("pcie_recovery_count", "Total number of PCIe recoveries"),
    device!("pcie_replay_rollover_count", "PCIe replay accumulated count"),
    device!("pcie_nack_sent_count", "PCIe NAK sent accumulated count"),
    device!("pcie_nack_received_count", "PCIe NAK received accumulated count"),
    device!(
        "gpu_clock",
        "List of current GPU clock frequencies in MHz",
        ["clock_index", "clock_type"]
    ),
    device!("gpu_power_usage", "GPU Power usage in Watts"),
    device!("gpu_total_vram", "Total VRAM memory of the GPU (in MB)"),
    device!("gpu_used_vram", "Used VRAM memory of the GPU (in MB)"),
    device!("gpu_free_vram", "Free VRAM memory of the GPU (in MB)"),
    device!("gpu_total_visible_vram", "Total visible VRAM memory of the GPU (in MB)"),
    device!("gpu_used_visible_vram", "Used visible VRAM memory of the GPU (in MB)"),
    device!("gpu_free_visible_vram", "Free visible VRAM memory of the GPU (in MB)"),
    device!(
        "gpu_total_gtt",
        "Total graphics translation table memory of the GPU (in MB)"
    ),
    device!(
        "gpu_used_gtt",
        "Used graphics translation table memory of the GPU (in MB)"
    ),
    device!(
        "gpu_free_gtt",
        "Free graphics translation table memory of the GPU (in MB)"
    ),
    device!("gpu_ecc_correct_total", "Total Correctable error count"),
    device!("gpu_ecc_uncorrect_total", "Total Uncorrectable error count"),
    device!("gpu_ecc_correct_sdma", "Correctable error count in SDMA block"),
    device!("gpu_ecc_uncorrect_sdma", "Uncorrectable error count in SDMA block"),
    device!("gpu_ecc_correct_gfx", "Correctable error count in GFX block"),
    device!("gpu_ecc_uncorrect_gfx", "Uncorrectable error count in GFX block"),
    device!("gpu_ecc_correct_mmhub", "Correctable error count in MMHUB block"),
    device!("gpu_ecc_uncorrect_mmhub", "Uncorrectable error count in MMHUB block"),
    device!("gpu_ecc_correct_athub", "Correctable error count in ATHUB block"),
    device!("gpu_ecc_uncorrect_athub", "Uncorrectable error count in ATHUB block"),
    device!("gpu_ecc_correct_bif", "Correctable error count in BIF block"),
    device!("gpu_ecc_uncorrect_bif", "Uncorrectable error count in BIF block"),
    device!("gpu_ecc_correct_hdp", "Correctable error count in HDP block"),
    device!("gpu_ecc_uncorrect_hdp", "Uncorrectable error count in HDP block"),
    device!("gpu_ecc_correct_xgmi_wafl", "Correctable error count in WAFL block"),
    device!("gpu_ecc_uncorrect_xgmi_wafl", "Uncorrectable error count in WAFL block"),
    device!("gpu_ecc_correct_df", "Correctable error count in DF block"),
    device!("gpu_ecc_uncorrect_df", "Uncorrectable error count in DF block"),
    device!("gpu_ecc_correct_smn", "Correctable error count in SMN block"),
    device!("gpu_ecc_uncorrect_smn", "Uncorrectable error count in SMN block"),
    device!("gpu_ecc_correct_sem", "Correctable error count in SEM block"),
    device!("gpu_ecc_uncorrect_sem", "Uncorrectable error count in SEM block"),
    device!("gpu_ecc_correct_mp0", "Correctable error count in MP0 block"),
    device!("gpu_ecc_uncorrect_mp0", "Uncorrectable error count in MP0 block"),
    device!("gpu_ecc_correct_mp1", "Correctable error count in MP1 block"),
    device!("gpu_ecc_uncorrect_mp1", "Uncorrectable error count in MP1 block"),
    device!("gpu_ecc_correct_fuse", "Correctable error count in Fuse block"),
    device!("gpu_ecc_uncorrect_fuse", "Uncorrectable error count in Fuse block"),
    device!("gpu_ecc_correct_umc", "Correctable error count in UMC block"),
    device!("gpu_ecc_uncorrect_umc", "Uncorrectable error count in UMC block"),
    device!("gpu_ecc_correct_mca", "Correctable error count in MCA block"),
    device!("gpu_ecc_uncorrect_mca", "Uncorrectable error count in MCA block"),
    device!("gpu_ecc_correct_vcn", "Correctable error count in VCN block"),
    device!("gpu_ecc_uncorrect_vcn", "Uncorrectable error count in VCN block"),
    device!("gpu_ecc_correct_jpeg", "Correctable error count in JPEG block"),
    device!("gpu_ecc_uncorrect_jpeg", "Uncorrectable error count in JPEG block"),
    device!("gpu_ecc_correct_ih", "Correctable error count in IH block"),
    device!("gpu_ecc_uncorrect_ih", "Uncorrectable error count in IH block"),
    device!("gpu_ecc_correct_mpio", "Correctable error count in MPIO block"),
    device!("gpu_ecc_uncorrect_mpio", "Uncorrectable error count in MPIO block"),
    device!("xgmi_neighbor_0_nop_tx", "NOPs sent to neighbor 0"),
    device!("xgmi_neighbor_1_nop_tx", "NOPs sent to neighbor 1"),
    device!("xgmi_neighbor_0_request_tx", "Outgoing requests to neighbor 0"),
    device!("xgmi_neighbor_1_request_tx", "Outgoing requests to neighbor 1"),
    device!("xgmi_neighbor_0_response_tx", "Outgoing responses to neighbor 0"),
    device!("xgmi_neighbor_1_response_tx", "Outgoing responses to neighbor 1"),
    device!(
        "xgmi_neighbor_0_beats_tx",
        "Data beats sent to neighbor 0; Each beat represents 32 bytes"
    ),
    device!(
        "xgmi_neighbor_1_beats_tx",
        "Data beats sent to neighbor 1; Each beat represents 32 bytes"
    ),
    device!(
        "xgmi_neighbor_0_tx_throughput",
        "Outbound beats (32 bytes each) on link 0; Throughput = BEATS/time_running * 10^9 bytes/sec"
    ),
    device!(
        "xgmi_neighbor_1_tx_throughput",
        "Outbound beats (32 bytes each) on link 1; Throughput = BEATS/time_running * 10^9 bytes/sec"
    ),
    device!(
        "xgmi_neighbor_2_tx_throughput",
        "Outbound beats (32 bytes each) on link 2; Throughput = BEATS/time_running * 10^9 bytes/sec"
    ),
    device!(
        "xgmi_neighbor_3_tx_throughput",
        "Outbound beats (32 bytes each) on link 3; Throughput = BEATS/time_running * 10^9 bytes/sec"
    ),
    device!(
        "xgmi_neighbor_4_tx_throughput",
        "Outbound beats (32 bytes each) on link 4; Throughput = BEATS/time_running * 10^9 bytes/sec"
    ),
    device!(
        "xgmi_neighbor_5_tx_throughput",
        "Outbound beats (32 bytes each) on link 5; Throughput = BEATS/time_running * 10^9 bytes/sec"
    ),
    device!(GPU_HEALTH, "Health of the GPU (0 = Unhealthy | 1 = Healthy)"),
    device!("gpu_xgmi_link_rx", "XGMI Link Data Read in KB", ["link_index"]),
    device!("gpu_xgmi_link_tx", "XGMI Link Data Write in KB", ["link_index"]),
    device!(
        "gpu_violation_current_accumulated_counter",
        "Accumulated violation sample count"
    ),
    device!(
        "gpu_violation_processor_hot_residency_accumulated",
        "Accumulated processor hot violation residency"
    ),
    device!(
        "gpu_violation_ppt_residency_accumulated",
        "Accumulated package power tracking violation residency"
    ),
    device!(
        "gpu_violation_socket_thermal_residency_accumulated",
        "Accumulated socket thermal violation residency"
    ),
    device!(
        "gpu_violation_vr_thermal_residency_accumulated",
        "Accumulated voltage regulator thermal violation residency"
    ),
    device!(
        "gpu_violation_hbm_thermal_residency_accumulated",
        "Accumulated HBM thermal violation residency"
    ),
    profiler!(
        "gpu_prof_grbm_gui_active",
        "GRBM_GUI_ACTIVE",
        "Number of GPU active cycles"
    ),
    profiler!("gpu_prof_sq_waves", "SQ_WAVES", "Number of waves sent to SQs"),
    profiler!(
        "gpu_prof_grbm_count",
        "GRBM_COUNT",
        "Number of free-running GPU cycles"
    ),
    profiler!(
        "gpu_prof_gui_util_percent",
        "GPU_UTIL",
        "Percentage of the time that GUI is active"
    ),
    profiler!(
        "gpu_prof_fetch_size",
        "FETCH_SIZE",
        "Total kilobytes fetched from the video memory"
    ),
    profiler!(
        "gpu_prof_write_size",
        "WRITE_SIZE",
        "Total kilobytes written to the video memory"
    ),
    profiler!(
        "gpu_prof_total_16_ops",
        "TOTAL_16_OPS",
        "Number of 16-bit operations"
    ),
    profiler!(
        "gpu_prof_total_32_ops",
        "TOTAL_32_OPS",
        "Number of 32-bit operations"
    ),
    profiler!(
        "gpu_prof_total_64_ops",
        "TOTAL_64_OPS",
        "Number of 64-bit operations"
    ),
    profiler!(
        "gpu_prof_cpc_cpc_stat_busy",
        "CPC_CPC_STAT_BUSY",
        "Number of cycles command processor-compute is busy"
    ),
    profiler!(
        "gpu_prof_cpc_cpc_stat_idle",
        "CPC_CPC_STAT_IDLE",
        "Number of cycles command processor-compute is idle"
    ),
    profiler!(
        "gpu_prof_cpc_cpc_stat_stall",
        "CPC_CPC_STAT_STALL",
        "Number of cycles command processor-compute is stalled"
    ),
    profiler!(
        "gpu_prof_occupancy_percent",
        "OccupancyPercent",
        "GPU occupancy as a percentage of maximum"
    ),
    profiler!(
        "gpu_prof_tensor_active_percent",
        "MfmaUtil",
        "Percentage of the MFMA unit utilization"
    ),
    profiler!(
        "gpu_prof_valu_pipe_issue_util",
        "ValuPipeIssueUtil",
        "Percentage of the time VALU instructions are issued"
    ),
    profiler!(
        "gpu_prof_sm_active",
        "VALUBusy",
        "Percentage of the time the vector ALU is busy"
    ),
];

/// Look a family up by config field name (case-insensitive) or metric name.
pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    let lower = name.trim().to_lowercase();
    FIELDS.iter().find(|f| f.name == lower)
}

pub fn profiler_fields() -> impl Iterator<Item = &'static FieldSpec> {
    FIELDS.iter().filter(|f| f.is_profiler())
}

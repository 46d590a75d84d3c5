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

//! Mapping from a device snapshot to gauge samples.

use std::collections::HashMap;

use crate::api::metrics::fields::{self, GPU_HEALTH};
use crate::api::metrics::{normalize, Labels, MetricSink};
use crate::health::Verdict;
use crate::proto::amdgpu::{Gpu, GpuStats};

type StatFn = fn(&GpuStats) -> u64;

static COUNTERS: &[(&str, StatFn)] = &[
    ("gpu_package_power", |s| s.package_power),
    ("gpu_average_package_power", |s| s.avg_package_power),
    ("gpu_ecc_correct_total", |s| s.total_correctable_errors),
    ("gpu_ecc_uncorrect_total", |s| s.total_uncorrectable_errors),
    ("gpu_ecc_correct_sdma", |s| s.sdma_correctable_errors),
    ("gpu_ecc_uncorrect_sdma", |s| s.sdma_uncorrectable_errors),
    ("gpu_ecc_correct_gfx", |s| s.gfx_correctable_errors),
    ("gpu_ecc_uncorrect_gfx", |s| s.gfx_uncorrectable_errors),
    ("gpu_ecc_correct_mmhub", |s| s.mmhub_correctable_errors),
    ("gpu_ecc_uncorrect_mmhub", |s| s.mmhub_uncorrectable_errors),
    ("gpu_ecc_correct_athub", |s| s.athub_correctable_errors),
    ("gpu_ecc_uncorrect_athub", |s| s.athub_uncorrectable_errors),
    ("gpu_ecc_correct_bif", |s| s.bif_correctable_errors),
    ("gpu_ecc_uncorrect_bif", |s| s.bif_uncorrectable_errors),
    ("gpu_ecc_correct_hdp", |s| s.hdp_correctable_errors),
    ("gpu_ecc_uncorrect_hdp", |s| s.hdp_uncorrectable_errors),
    ("gpu_ecc_correct_xgmi_wafl", |s| s.xgmi_wafl_correctable_errors),
    ("gpu_ecc_uncorrect_xgmi_wafl", |s| s.xgmi_wafl_uncorrectable_errors),
    ("gpu_ecc_correct_df", |s| s.df_correctable_errors),
    ("gpu_ecc_uncorrect_df", |s| s.df_uncorrectable_errors),
    ("gpu_ecc_correct_smn", |s| s.smn_correctable_errors),
    ("gpu_ecc_uncorrect_smn", |s| s.smn_uncorrectable_errors),
    ("gpu_ecc_correct_sem", |s| s.sem_correctable_errors),
    ("gpu_ecc_uncorrect_sem", |s| s.sem_uncorrectable_errors),
    ("gpu_ecc_correct_mp0", |s| s.mp0_correctable_errors),
    ("gpu_ecc_uncorrect_mp0", |s| s.mp0_uncorrectable_errors),
    ("gpu_ecc_correct_mp1", |s| s.mp1_correctable_errors),
    ("gpu_ecc_uncorrect_mp1", |s| s.mp1_uncorrectable_errors),
    ("gpu_ecc_correct_fuse", |s| s.fuse_correctable_errors),
    ("gpu_ecc_uncorrect_fuse", |s| s.fuse_uncorrectable_errors),
    ("gpu_ecc_correct_umc", |s| s.umc_correctable_errors),
    ("gpu_ecc_uncorrect_umc", |s| s.umc_uncorrectable_errors),
    ("gpu_ecc_correct_mca", |s| s.mca_correctable_errors),
    ("gpu_ecc_uncorrect_mca", |s| s.mca_uncorrectable_errors),
    ("gpu_ecc_correct_vcn", |s| s.vcn_correctable_errors),
    ("gpu_ecc_uncorrect_vcn", |s| s.vcn_uncorrectable_errors),
    ("gpu_ecc_correct_jpeg", |s| s.jpeg_correctable_errors),
    ("gpu_ecc_uncorrect_jpeg", |s| s.jpeg_uncorrectable_errors),
    ("gpu_ecc_correct_ih", |s| s.ih_correctable_errors),
    ("gpu_ecc_uncorrect_ih", |s| s.ih_uncorrectable_errors),
    ("gpu_ecc_correct_mpio", |s| s.mpio_correctable_errors),
    ("gpu_ecc_uncorrect_mpio", |s| s.mpio_uncorrectable_errors),
    ("xgmi_neighbor_0_nop_tx", |s| s.xgmi_neighbor0_tx_nops),
    ("xgmi_neighbor_1_nop_tx", |s| s.xgmi_neighbor1_tx_nops),
    ("xgmi_neighbor_0_request_tx", |s| s.xgmi_neighbor0_tx_requests),
    ("xgmi_neighbor_1_request_tx", |s| s.xgmi_neighbor1_tx_requests),
    ("xgmi_neighbor_0_response_tx", |s| s.xgmi_neighbor0_tx_responses),
    ("xgmi_neighbor_1_response_tx", |s| s.xgmi_neighbor1_tx_responses),
    ("xgmi_neighbor_0_beats_tx", |s| s.xgmi_neighbor0_tx_beats),
    ("xgmi_neighbor_1_beats_tx", |s| s.xgmi_neighbor1_tx_beats),
    ("xgmi_neighbor_0_tx_throughput", |s| s.xgmi_neighbor0_tx_throughput),
    ("xgmi_neighbor_1_tx_throughput", |s| s.xgmi_neighbor1_tx_throughput),
    ("xgmi_neighbor_2_tx_throughput", |s| s.xgmi_neighbor2_tx_throughput),
    ("xgmi_neighbor_3_tx_throughput", |s| s.xgmi_neighbor3_tx_throughput),
    ("xgmi_neighbor_4_tx_throughput", |s| s.xgmi_neighbor4_tx_throughput),
    ("xgmi_neighbor_5_tx_throughput", |s| s.xgmi_neighbor5_tx_throughput),
];

/// Per-device inputs that do not come from the agent snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceExtras<'a> {
    pub health: Option<Verdict>,
    /// Used VRAM in MB from the kernel topology; wins over the agent value.
    pub used_vram: Option<u64>,
    pub profile: Option<&'a HashMap<String, f64>>,
}

fn indexed(base: &Labels, pairs: &[(&str, String)]) -> Labels {
    let mut labels = base.clone();
    for (key, value) in pairs {
        labels.insert((*key).to_string(), value.clone());
    }
    labels
}

/// Write every sample of one device into `sink`.
pub fn emit_device<S: MetricSink>(sink: &mut S, labels: &Labels, gpu: &Gpu, extras: &DeviceExtras<'_>) {
    if let Some(stats) = gpu.stats.as_ref() {
        emit_stats(sink, labels, stats, extras);
    } else if let Some(used) = extras.used_vram {
        sink.set("gpu_used_vram", labels, used as f64);
    }

    if let Some(status) = gpu.status.as_ref() {
        if let Some(pcie) = status.pcie_status.as_ref() {
            sink.set("pcie_speed", labels, normalize(pcie.speed));
            sink.set("pcie_max_speed", labels, normalize(pcie.max_speed));
            sink.set("pcie_bandwidth", labels, normalize(pcie.bandwidth));
        }
        for (j, clock) in status.clock_status.iter().enumerate() {
            let clock_labels = indexed(
                labels,
                &[
                    ("clock_index", j.to_string()),
                    ("clock_type", clock.r#type().as_str_name().to_string()),
                ],
            );
            sink.set("gpu_clock", &clock_labels, normalize(clock.frequency));
        }
    }

    if let Some(verdict) = extras.health {
        let value = if verdict.is_healthy() { 1.0 } else { 0.0 };
        sink.set(GPU_HEALTH, labels, value);
    }

    if let Some(profile) = extras.profile {
        for spec in fields::profiler_fields() {
            if let Some(value) = spec.profiler.and_then(|alias| profile.get(alias)) {
                sink.set(spec.name, labels, *value);
            }
        }
    }
}

fn emit_stats<S: MetricSink>(sink: &mut S, labels: &Labels, stats: &GpuStats, extras: &DeviceExtras<'_>) {
    for (family, get) in COUNTERS {
        sink.set(family, labels, normalize(get(stats)));
    }
    sink.set("gpu_energy_consumed", labels, stats.energy_consumed);
    sink.set("gpu_power_usage", labels, f64::from(stats.power_usage));

    if let Some(temp) = stats.temperature.as_ref() {
        sink.set("gpu_edge_temperature", labels, f64::from(temp.edge_temperature));
        sink.set("gpu_junction_temperature", labels, f64::from(temp.junction_temperature));
        sink.set("gpu_memory_temperature", labels, f64::from(temp.memory_temperature));
        for (j, value) in temp.hbm_temperature.iter().enumerate() {
            let hbm = indexed(labels, &[("hbm_index", j.to_string())]);
            sink.set("gpu_hbm_temperature", &hbm, f64::from(*value));
        }
    }

    if let Some(usage) = stats.usage.as_ref() {
        sink.set("gpu_gfx_activity", labels, f64::from(usage.gfx_activity));
        sink.set("gpu_umc_activity", labels, f64::from(usage.umc_activity));
        sink.set("gpu_mma_activity", labels, normalize(usage.mm_activity));
        for (j, value) in usage.vcn_activity.iter().enumerate() {
            let vcn = indexed(labels, &[("vcn_index", j.to_string())]);
            sink.set("gpu_vcn_activity", &vcn, normalize(*value));
        }
        for (j, value) in usage.jpeg_activity.iter().enumerate() {
            let jpeg = indexed(labels, &[("jpeg_index", j.to_string())]);
            sink.set("gpu_jpeg_activity", &jpeg, normalize(*value));
        }
    }

    if let Some(volt) = stats.voltage.as_ref() {
        sink.set("gpu_voltage", labels, normalize(volt.voltage));
        sink.set("gpu_gfx_voltage", labels, normalize(volt.gfx_voltage));
        sink.set("gpu_memory_voltage", labels, normalize(volt.memory_voltage));
    }

    if let Some(pcie) = stats.pcie_stats.as_ref() {
        sink.set("pcie_replay_count", labels, normalize(pcie.replay_count));
        sink.set("pcie_recovery_count", labels, normalize(pcie.recovery_count));
        sink.set("pcie_replay_rollover_count", labels, normalize(pcie.replay_rollover_count));
        sink.set("pcie_nack_sent_count", labels, normalize(pcie.nack_sent_count));
        sink.set("pcie_nack_received_count", labels, normalize(pcie.nack_received_count));
    }

    if let Some(vram) = stats.vram_usage.as_ref() {
        sink.set("gpu_total_vram", labels, normalize(vram.total_vram));
        sink.set("gpu_free_vram", labels, normalize(vram.free_vram));
        sink.set("gpu_total_visible_vram", labels, normalize(vram.total_visible_vram));
        sink.set("gpu_used_visible_vram", labels, normalize(vram.used_visible_vram));
        sink.set("gpu_free_visible_vram", labels, normalize(vram.free_visible_vram));
        sink.set("gpu_total_gtt", labels, normalize(vram.total_gtt));
        sink.set("gpu_used_gtt", labels, normalize(vram.used_gtt));
        sink.set("gpu_free_gtt", labels, normalize(vram.free_gtt));
    }
    let used_vram = match (extras.used_vram, stats.vram_usage.as_ref()) {
        (Some(used), _) => Some(used as f64),
        (None, Some(vram)) => Some(normalize(vram.used_vram)),
        (None, None) => None,
    };
    if let Some(used) = used_vram {
        sink.set("gpu_used_vram", labels, used);
    }

    for (j, link) in stats.xgmi_link_stats.iter().enumerate() {
        let link_labels = indexed(labels, &[("link_index", j.to_string())]);
        sink.set("gpu_xgmi_link_rx", &link_labels, normalize(link.data_read));
        sink.set("gpu_xgmi_link_tx", &link_labels, normalize(link.data_write));
    }

    if let Some(v) = stats.violation_stats.as_ref() {
        sink.set("gpu_violation_current_accumulated_counter", labels, normalize(v.current_accumulated_counter));
        sink.set(
            "gpu_violation_processor_hot_residency_accumulated",
            labels,
            normalize(v.processor_hot_residency_accumulated),
        );
        sink.set("gpu_violation_ppt_residency_accumulated", labels, normalize(v.ppt_residency_accumulated));
        sink.set(
            "gpu_violation_socket_thermal_residency_accumulated",
            labels,
            normalize(v.socket_thermal_residency_accumulated),
        );
        sink.set(
            "gpu_violation_vr_thermal_residency_accumulated",
            labels,
            normalize(v.vr_thermal_residency_accumulated),
        );
        sink.set(
            "gpu_violation_hbm_thermal_residency_accumulated",
            labels,
            normalize(v.hbm_thermal_residency_accumulated),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::amdgpu::{
        GpuClockStatus, GpuClockType, GpuPcieStatus, GpuStatus, GpuTemperatureStats, GpuUsage,
        GpuVramUsage,
    };
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Recorder {
        samples: BTreeMap<(String, Vec<(String, String)>), f64>,
    }

    impl MetricSink for Recorder {
        fn set(&mut self, family: &str, labels: &Labels, value: f64) -> bool {
            let mut pairs: Vec<(String, String)> =
                labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            pairs.sort();
            self.samples.insert((family.to_string(), pairs), value);
            true
        }
    }

    impl Recorder {
        fn value(&self, family: &str, extra: &[(&str, &str)]) -> Option<f64> {
            self.samples
                .iter()
                .find(|((f, pairs), _)| {
                    f == family
                        && extra
                            .iter()
                            .all(|(k, v)| pairs.iter().any(|(pk, pv)| pk == k && pv == v))
                })
                .map(|(_, v)| *v)
        }

        fn count(&self, family: &str) -> usize {
            self.samples.keys().filter(|(f, _)| f == family).count()
        }
    }

    fn base_labels() -> Labels {
        let mut l = Labels::new();
        l.insert("gpu_id".to_string(), "0".to_string());
        l
    }

    fn sample_gpu() -> Gpu {
        Gpu {
            spec: None,
            status: Some(GpuStatus {
                index: 0,
                pcie_status: Some(GpuPcieStatus {
                    pcie_bus_id: "0000:0c:00.0".into(),
                    speed: 32,
                    max_speed: u32::MAX,
                    bandwidth: 64000,
                }),
                clock_status: vec![
                    GpuClockStatus {
                        r#type: GpuClockType::System as i32,
                        frequency: 2100,
                    },
                    GpuClockStatus {
                        r#type: GpuClockType::Memory as i32,
                        frequency: 1300,
                    },
                ],
                ..Default::default()
            }),
            stats: Some(GpuStats {
                package_power: 41,
                energy_consumed: 1234.5,
                gfx_uncorrectable_errors: u64::MAX,
                temperature: Some(GpuTemperatureStats {
                    edge_temperature: 40.5,
                    hbm_temperature: vec![50.0, 51.0, 52.0],
                    ..Default::default()
                }),
                usage: Some(GpuUsage {
                    gfx_activity: 99,
                    vcn_activity: vec![1, u32::from(u16::MAX)],
                    ..Default::default()
                }),
                vram_usage: Some(GpuVramUsage {
                    total_vram: 196_592,
                    used_vram: 100,
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_scalar_and_sentinel_values() {
        let mut rec = Recorder::default();
        emit_device(&mut rec, &base_labels(), &sample_gpu(), &DeviceExtras::default());
        assert_eq!(rec.value("gpu_package_power", &[]), Some(41.0));
        assert_eq!(rec.value("gpu_energy_consumed", &[]), Some(1234.5));
        assert_eq!(rec.value("gpu_ecc_uncorrect_gfx", &[]), Some(0.0));
        assert_eq!(rec.value("gpu_edge_temperature", &[]), Some(40.5));
        assert_eq!(rec.value("gpu_gfx_activity", &[]), Some(99.0));
        assert_eq!(rec.value("pcie_speed", &[]), Some(32.0));
        assert_eq!(rec.value("pcie_max_speed", &[]), Some(0.0));
        assert_eq!(rec.value("gpu_used_vram", &[]), Some(100.0));
        assert!(rec.value(GPU_HEALTH, &[]).is_none());
    }

    #[test]
    fn test_indexed_families() {
        let mut rec = Recorder::default();
        emit_device(&mut rec, &base_labels(), &sample_gpu(), &DeviceExtras::default());
        assert_eq!(rec.count("gpu_hbm_temperature"), 3);
        assert_eq!(rec.value("gpu_hbm_temperature", &[("hbm_index", "2")]), Some(52.0));
        assert_eq!(rec.count("gpu_vcn_activity"), 2);
        assert_eq!(rec.value("gpu_vcn_activity", &[("vcn_index", "1")]), Some(0.0));
        assert_eq!(
            rec.value(
                "gpu_clock",
                &[("clock_index", "0"), ("clock_type", "GPU_CLOCK_TYPE_SYSTEM")]
            ),
            Some(2100.0)
        );
        assert_eq!(rec.count("gpu_clock"), 2);
        // index labels never leak onto scalar families
        assert!(rec
            .samples
            .keys()
            .filter(|(f, _)| f == "gpu_package_power")
            .all(|(_, pairs)| pairs.len() == 1));
    }

    #[test]
    fn test_extras() {
        let mut profile = HashMap::new();
        profile.insert("GRBM_GUI_ACTIVE".to_string(), 12.5);
        let extras = DeviceExtras {
            health: Some(Verdict::Unhealthy),
            used_vram: Some(2048),
            profile: Some(&profile),
        };
        let mut rec = Recorder::default();
        emit_device(&mut rec, &base_labels(), &sample_gpu(), &extras);
        assert_eq!(rec.value(GPU_HEALTH, &[]), Some(0.0));
        assert_eq!(rec.value("gpu_used_vram", &[]), Some(2048.0));
        assert_eq!(rec.value("gpu_prof_grbm_gui_active", &[]), Some(12.5));
        assert!(rec.value("gpu_prof_sq_waves", &[]).is_none());
    }
}

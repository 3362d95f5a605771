//! Static anomaly catalog: 12 injectable anomalies across four tiers plus the
//! baseline entry. Injection and cleanup both dispatch on `InjectionKind`, so
//! adding an anomaly means adding one table entry here.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKey {
    PerformanceCpu,
    PerformanceNetwork,
    PerformanceDisk,
    ServiceComposePost,
    ServiceHomeTimeline,
    ServiceUserTimeline,
    DatabaseHomeCache,
    DatabaseUserCache,
    DatabasePostCache,
    CodeUserService,
    CodeTextService,
    CodeMediaService,
    Normal,
}

impl AnomalyKey {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKey::PerformanceCpu => "performance_cpu",
            AnomalyKey::PerformanceNetwork => "performance_network",
            AnomalyKey::PerformanceDisk => "performance_disk",
            AnomalyKey::ServiceComposePost => "service_composepost",
            AnomalyKey::ServiceHomeTimeline => "service_hometimeline",
            AnomalyKey::ServiceUserTimeline => "service_usertimeline",
            AnomalyKey::DatabaseHomeCache => "database_homecache",
            AnomalyKey::DatabaseUserCache => "database_usercache",
            AnomalyKey::DatabasePostCache => "database_postcache",
            AnomalyKey::CodeUserService => "code_userservice",
            AnomalyKey::CodeTextService => "code_textservice",
            AnomalyKey::CodeMediaService => "code_mediaservice",
            AnomalyKey::Normal => "normal",
        }
    }
}

impl fmt::Display for AnomalyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        catalog()
            .iter()
            .find(|e| e.key.as_str() == s)
            .map(|e| e.key)
            .ok_or_else(|| {
                let known: Vec<&str> = catalog().iter().map(|e| e.key.as_str()).collect();
                format!("unknown anomaly key '{}' (known: {})", s, known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Performance,
    Service,
    Database,
    Code,
    Baseline,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Performance => "performance",
            Tier::Service => "service",
            Tier::Database => "database",
            Tier::Code => "code",
            Tier::Baseline => "baseline",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "performance" => Ok(Tier::Performance),
            "service" => Ok(Tier::Service),
            "database" => Ok(Tier::Database),
            "code" => Ok(Tier::Code),
            "baseline" => Ok(Tier::Baseline),
            other => Err(format!(
                "unknown tier '{}' (known: performance, service, database, code, baseline)",
                other
            )),
        }
    }
}

/// How an anomaly is injected; carries everything inject and cleanup need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    CpuLoad { percent: u32 },
    NetworkLoss { percent: u32 },
    DiskBurn,
    ProcessKill {
        process: &'static str,
    },
    CacheLimit {
        container: &'static str,
        percent: u32,
        /// In-container command that lifts the memory bound again after the
        /// engine fault is destroyed; absent for caches without live
        /// reconfiguration, which rely on the engine timeout alone.
        restore: Option<&'static [&'static str]>,
    },
    ContainerStop {
        containers: &'static [&'static str],
    },
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyEntry {
    pub key: AnomalyKey,
    pub tier: Tier,
    pub display_name: &'static str,
    pub kind: InjectionKind,
}

impl AnomalyEntry {
    /// Whether a successful injection yields a fault-engine handle that
    /// cleanup must later destroy.
    pub fn requires_engine_handle(&self) -> bool {
        !matches!(
            self.kind,
            InjectionKind::ContainerStop { .. } | InjectionKind::None
        )
    }

    pub fn requires_elevated_destroy(&self) -> bool {
        matches!(self.kind, InjectionKind::ProcessKill { .. })
    }
}

const REDIS_RESTORE: &[&str] = &["redis-cli", "config", "set", "maxmemory", "0"];

const CATALOG: [AnomalyEntry; 13] = [
    AnomalyEntry {
        key: AnomalyKey::Normal,
        tier: Tier::Baseline,
        display_name: "Baseline (no injection)",
        kind: InjectionKind::None,
    },
    AnomalyEntry {
        key: AnomalyKey::PerformanceCpu,
        tier: Tier::Performance,
        display_name: "CPU contention",
        kind: InjectionKind::CpuLoad { percent: 100 },
    },
    AnomalyEntry {
        key: AnomalyKey::PerformanceNetwork,
        tier: Tier::Performance,
        display_name: "Network packet loss",
        kind: InjectionKind::NetworkLoss { percent: 50 },
    },
    AnomalyEntry {
        key: AnomalyKey::PerformanceDisk,
        tier: Tier::Performance,
        display_name: "Disk IO saturation",
        kind: InjectionKind::DiskBurn,
    },
    AnomalyEntry {
        key: AnomalyKey::ServiceComposePost,
        tier: Tier::Service,
        display_name: "Compose-post service kill",
        kind: InjectionKind::ProcessKill {
            process: "compose-post-service",
        },
    },
    AnomalyEntry {
        key: AnomalyKey::ServiceHomeTimeline,
        tier: Tier::Service,
        display_name: "Home-timeline service kill",
        kind: InjectionKind::ProcessKill {
            process: "home-timeline-service",
        },
    },
    AnomalyEntry {
        key: AnomalyKey::ServiceUserTimeline,
        tier: Tier::Service,
        display_name: "User-timeline service kill",
        kind: InjectionKind::ProcessKill {
            process: "user-timeline-service",
        },
    },
    AnomalyEntry {
        key: AnomalyKey::DatabaseHomeCache,
        tier: Tier::Database,
        display_name: "Home-timeline cache degradation",
        kind: InjectionKind::CacheLimit {
            container: "home-timeline-redis",
            percent: 50,
            restore: Some(REDIS_RESTORE),
        },
    },
    AnomalyEntry {
        key: AnomalyKey::DatabaseUserCache,
        tier: Tier::Database,
        display_name: "User-timeline cache degradation",
        kind: InjectionKind::CacheLimit {
            container: "user-timeline-redis",
            percent: 50,
            restore: Some(REDIS_RESTORE),
        },
    },
    AnomalyEntry {
        key: AnomalyKey::DatabasePostCache,
        tier: Tier::Database,
        display_name: "Post-storage cache degradation",
        kind: InjectionKind::CacheLimit {
            container: "post-storage-memcached",
            percent: 50,
            restore: None,
        },
    },
    AnomalyEntry {
        key: AnomalyKey::CodeUserService,
        tier: Tier::Code,
        display_name: "User service outage",
        kind: InjectionKind::ContainerStop {
            containers: &["user-service"],
        },
    },
    AnomalyEntry {
        key: AnomalyKey::CodeTextService,
        tier: Tier::Code,
        display_name: "Text service outage",
        kind: InjectionKind::ContainerStop {
            containers: &["text-service"],
        },
    },
    AnomalyEntry {
        key: AnomalyKey::CodeMediaService,
        tier: Tier::Code,
        display_name: "Media service outage",
        kind: InjectionKind::ContainerStop {
            containers: &["media-service"],
        },
    },
];

pub fn catalog() -> &'static [AnomalyEntry] {
    &CATALOG
}

pub fn entry(key: AnomalyKey) -> &'static AnomalyEntry {
    // The catalog covers every key; index 0 is the baseline.
    CATALOG.iter().find(|e| e.key == key).unwrap_or(&CATALOG[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_thirteen_entries_with_unique_keys() {
        assert_eq!(catalog().len(), 13);
        for (i, a) in catalog().iter().enumerate() {
            for b in catalog().iter().skip(i + 1) {
                assert_ne!(a.key, b.key, "duplicate key {}", a.key);
            }
        }
    }

    #[test]
    fn every_key_round_trips_through_from_str() {
        for e in catalog() {
            let parsed: AnomalyKey = e.key.as_str().parse().expect("parse key");
            assert_eq!(parsed, e.key);
        }
        assert!("bogus".parse::<AnomalyKey>().is_err());
    }

    #[test]
    fn baseline_is_the_only_entry_without_behavior() {
        let baselines: Vec<_> = catalog()
            .iter()
            .filter(|e| e.kind == InjectionKind::None)
            .collect();
        assert_eq!(baselines.len(), 1);
        assert_eq!(baselines[0].key, AnomalyKey::Normal);
        assert_eq!(baselines[0].tier, Tier::Baseline);
    }

    #[test]
    fn handle_and_privilege_flags_follow_the_kind() {
        let cpu = entry(AnomalyKey::PerformanceCpu);
        assert_eq!(cpu.kind, InjectionKind::CpuLoad { percent: 100 });
        assert!(cpu.requires_engine_handle());
        assert!(!cpu.requires_elevated_destroy());

        let kill = entry(AnomalyKey::ServiceComposePost);
        assert!(kill.requires_engine_handle());
        assert!(kill.requires_elevated_destroy());

        let code = entry(AnomalyKey::CodeUserService);
        assert!(!code.requires_engine_handle());
        assert_eq!(
            code.kind,
            InjectionKind::ContainerStop {
                containers: &["user-service"]
            }
        );
    }

    #[test]
    fn only_reconfigurable_caches_carry_a_restore_command() {
        for e in catalog() {
            if let InjectionKind::CacheLimit {
                container, restore, ..
            } = e.kind
            {
                assert_eq!(
                    restore.is_some(),
                    container.ends_with("-redis"),
                    "restore command mismatch for {container}"
                );
            }
        }
    }

    #[test]
    fn tiers_partition_the_injectable_anomalies() {
        for tier in [Tier::Performance, Tier::Service, Tier::Database, Tier::Code] {
            let count = catalog().iter().filter(|e| e.tier == tier).count();
            assert_eq!(count, 3, "tier {} should hold 3 anomalies", tier);
        }
    }
}

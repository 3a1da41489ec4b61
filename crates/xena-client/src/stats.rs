//! Statistics views: one-shot aggregations over every port, stream or
//! TPLD in a session, keyed by entity name.

use std::collections::BTreeMap;
use std::sync::Arc;

use xena_core::error::Result;

use crate::object::XenaEntity;
use crate::port::XenaPort;
use crate::session::XenaSession;

/// `group -> field -> counter`.
pub type GroupStats = BTreeMap<String, BTreeMap<String, u64>>;

/// Counters of every port in the session at one point in time.
pub struct XenaPortsStats {
    stats: BTreeMap<String, GroupStats>,
}

impl XenaPortsStats {
    /// Read the counters of every session port.
    pub fn read(session: &XenaSession) -> Result<Self> {
        let mut stats = BTreeMap::new();
        for port in session.ports() {
            stats.insert(port.name(), port.read_port_stats()?);
        }
        Ok(Self { stats })
    }

    /// `port name -> group -> field -> counter`.
    pub fn stats(&self) -> &BTreeMap<String, GroupStats> {
        &self.stats
    }

    /// Flattened view, `port name -> "group_field" -> counter`.
    pub fn flat(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.stats
            .iter()
            .map(|(port, groups)| {
                let flat = groups
                    .iter()
                    .flat_map(|(group, fields)| {
                        fields
                            .iter()
                            .map(move |(field, value)| (format!("{group}_{field}"), *value))
                    })
                    .collect();
                (port.clone(), flat)
            })
            .collect()
    }
}

/// Transmit and receive counters of one stream. Receive side is read
/// from the TPLD counters of every port that saw the stream's TPLD id.
pub struct StreamStats {
    pub tx: BTreeMap<String, u64>,
    /// `receiving port name -> group -> field -> counter`.
    pub rx: BTreeMap<String, GroupStats>,
}

/// End-to-end counters of every stream in the session.
pub struct XenaStreamsStats {
    stats: BTreeMap<String, StreamStats>,
}

impl XenaStreamsStats {
    pub fn read(session: &XenaSession) -> Result<Self> {
        let ports = session.ports();
        let mut stats = BTreeMap::new();
        for port in &ports {
            for stream in port.streams()? {
                let tx = stream.read_stats()?;
                let rx = match stream.tpld_id()? {
                    Some(tpld_id) => rx_for_tpld(&ports, tpld_id)?,
                    None => BTreeMap::new(),
                };
                stats.insert(stream.name(), StreamStats { tx, rx });
            }
        }
        Ok(Self { stats })
    }

    /// `stream name -> tx/rx counters`.
    pub fn stats(&self) -> &BTreeMap<String, StreamStats> {
        &self.stats
    }
}

fn rx_for_tpld(ports: &[Arc<XenaPort>], tpld_id: u32) -> Result<BTreeMap<String, GroupStats>> {
    let mut rx = BTreeMap::new();
    for port in ports {
        for tpld in port.tplds()? {
            if tpld.id() == Some(tpld_id) {
                rx.insert(port.name(), tpld.read_stats()?);
            }
        }
    }
    Ok(rx)
}

/// Receive counters of every TPLD currently seen by the session's
/// ports, keyed `port name/tpld id`.
pub struct XenaTpldsStats {
    stats: BTreeMap<String, GroupStats>,
}

impl XenaTpldsStats {
    pub fn read(session: &XenaSession) -> Result<Self> {
        let mut stats = BTreeMap::new();
        for port in session.ports() {
            for tpld in port.tplds()? {
                if let Some(id) = tpld.id() {
                    stats.insert(format!("{}/{id}", tpld.port_name()), tpld.read_stats()?);
                }
            }
        }
        Ok(Self { stats })
    }

    pub fn stats(&self) -> &BTreeMap<String, GroupStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(pairs: &[(&str, &[(&str, u64)])]) -> GroupStats {
        pairs
            .iter()
            .map(|(group, fields)| {
                (
                    group.to_string(),
                    fields
                        .iter()
                        .map(|(f, v)| (f.to_string(), *v))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn flat_view_joins_group_and_field() {
        let mut stats = BTreeMap::new();
        stats.insert(
            "10.1.1.1/3/0".to_string(),
            groups(&[
                ("pr_total", &[("bps", 10), ("pps", 2)]),
                ("pt_total", &[("bps", 90)]),
            ]),
        );
        let flat = XenaPortsStats { stats }.flat();
        let port = &flat["10.1.1.1/3/0"];
        assert_eq!(port["pr_total_bps"], 10);
        assert_eq!(port["pr_total_pps"], 2);
        assert_eq!(port["pt_total_bps"], 90);
        assert_eq!(port.len(), 3);
    }
}

//! queues.conf renderer: one queue per enabled ring group.

use std::fmt::Write;

use crate::models::{RingGroup, RingStrategy};

use super::ConfigSnapshot;

pub fn render(snapshot: &ConfigSnapshot) -> String {
    let mut groups: Vec<&RingGroup> =
        snapshot.ring_groups.iter().filter(|g| g.enabled).collect();
    groups.sort_by_key(|g| g.id);

    let mut out = String::from(
        "; queues.conf - generated, do not edit by hand\n\
         \n\
         [general]\n\
         persistentmembers=no\n\n",
    );

    for group in groups {
        // Unknown strategies never pass validation.
        let Some(strategy) = group.strategy() else {
            continue;
        };

        let _ = writeln!(out, "; {}", group.name);
        let _ = writeln!(out, "[{}]", group.queue_name());
        let _ = writeln!(out, "strategy={}", strategy.queue_keyword());
        let _ = writeln!(out, "timeout={}", group.ring_time);
        out.push_str("retry=2\nringinuse=no\n");

        let mut members = group.members.clone();
        members.sort();
        for member in members {
            let _ = writeln!(out, "member => PJSIP/{}", member);
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::provision::snapshot::test_fixtures::*;

    #[test]
    fn test_queue_renders_strategy_and_members() {
        let mut snapshot = ConfigSnapshot::default();
        let mut rg = group(7, "Support", "600", &["1002", "1001"]);
        rg.strategy = "leastrecent".to_string();
        rg.ring_time = 25;
        snapshot.ring_groups.push(rg);

        let output = render(&snapshot);

        assert!(output.contains("[rg_7]\nstrategy=leastrecent\ntimeout=25\n"));
        // Members sorted for stable output.
        let first = output.find("member => PJSIP/1001").unwrap();
        let second = output.find("member => PJSIP/1002").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_disabled_group_is_absent() {
        let mut snapshot = ConfigSnapshot::default();
        let mut off = group(1, "Off", "601", &["1001"]);
        off.enabled = false;
        snapshot.ring_groups.push(off);

        assert!(!render(&snapshot).contains("rg_1"));
    }
}

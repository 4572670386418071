//! extensions.conf renderer.
//!
//! Layout follows the switch's expectations: an `[internal]` context for
//! extension-to-extension dialing, outbound trunk dispatch and feature
//! codes, a `[from-trunk]` context for inbound DID routing, and one
//! `[ivr-{id}]` context per menu. Call-forward evaluation order is fixed:
//! an unconditional forward short-circuits before busy/no-answer are even
//! considered.

use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{CallForward, ForwardType, InboundRoute, IvrMenu, RingGroup};

use super::ConfigSnapshot;

/// Ring seconds used when no mailbox overrides it.
const DEFAULT_RING_TIMEOUT: i32 = 20;

pub fn render(snapshot: &ConfigSnapshot) -> String {
    let forward_map = snapshot.forward_map();
    let ring_timeouts = snapshot.ring_timeout_map();

    let mut out = String::from(
        "; extensions.conf - generated, do not edit by hand\n\
         \n\
         [general]\n\
         static=yes\n\
         writeprotect=no\n\
         clearglobalvars=no\n\
         \n\
         [globals]\n\
         \n\
         [internal]\n\
         ; Internal extension dialing (PJSIP)\n",
    );

    let mut groups: Vec<&RingGroup> =
        snapshot.ring_groups.iter().filter(|g| g.enabled).collect();
    groups.sort_by(|a, b| a.extension.cmp(&b.extension));
    for group in &groups {
        let _ = writeln!(out, "exten => {},1,NoOp(Ring Group {})", group.extension, group.name);
        out.push_str(" same => n,Set(CALLERID(name)=${CALLERID(name)})\n");
        out.push_str(&ring_group_logic(group));
        out.push_str("\n\n");
    }

    let mut menus: Vec<&IvrMenu> = snapshot.ivr_menus.iter().filter(|m| m.enabled).collect();
    menus.sort_by(|a, b| a.extension.cmp(&b.extension));
    for menu in &menus {
        let _ = writeln!(out, "exten => {},1,NoOp(IVR {})", menu.extension, menu.name);
        let _ = writeln!(out, " same => n,Goto(ivr-{},s,1)", menu.id);
        out.push('\n');
    }

    // Generic internal dialing pattern with BLF hints for every peer.
    out.push_str("exten => _1XXX,1,NoOp(Internal Call from ${CALLERID(all)} to ${EXTEN})\n");
    out.push_str(" same => n,Set(CALLERID(name)=${CALLERID(name)})\n");

    let mut peers: Vec<_> = snapshot
        .peers
        .iter()
        .filter(|p| p.enabled && p.blf_enabled)
        .collect();
    peers.sort_by(|a, b| a.extension.cmp(&b.extension));
    for peer in &peers {
        let _ = writeln!(out, "exten => {},hint,PJSIP/{}", peer.extension, peer.extension);
    }

    out.push_str(&dial_logic("${EXTEN}", None, DEFAULT_RING_TIMEOUT, false));
    out.push_str("\n\n");

    // Extensions that need their own block: forwarding rules or a custom
    // ring timeout.
    let mut overridden: Vec<&str> = forward_map.keys().copied().collect();
    for (&ext, &timeout) in &ring_timeouts {
        if timeout != DEFAULT_RING_TIMEOUT && !overridden.contains(&ext) {
            overridden.push(ext);
        }
    }
    overridden.sort_unstable();

    for ext in overridden {
        let ring = ring_timeouts.get(ext).copied().unwrap_or(DEFAULT_RING_TIMEOUT);
        let _ = writeln!(out, "; Extension {} - custom rules", ext);
        let _ = writeln!(out, "exten => {},1,NoOp(Call to {} with forwarding)", ext, ext);
        out.push_str(" same => n,Set(CALLERID(name)=${CALLERID(name)})\n");
        out.push_str(&dial_logic(ext, forward_map.get(ext), ring, false));
        out.push_str("\n\n");
    }

    render_outbound(&mut out, snapshot);
    out.push_str(FEATURE_CODES);

    out.push_str("\n[from-trunk]\n; Inbound DID routing\n\n");
    out.push_str("; Extract the DID from the To header when the Request-URI has no user part\n");
    out.push_str("exten => s,1,NoOp(Inbound call with no DID in Request-URI)\n");
    out.push_str(" same => n,Set(TO_HDR=${PJSIP_HEADER(read,To)})\n");
    out.push_str(" same => n,Set(DID=${CUT(CUT(TO_HDR,@,1),:,2)})\n");
    out.push_str(" same => n,NoOp(Extracted DID: ${DID})\n");
    out.push_str(" same => n,GotoIf($[${LEN(${DID})} > 0]?from-trunk,${DID},1)\n");
    out.push_str(" same => n,NoOp(Could not extract DID from To header)\n");
    out.push_str(" same => n,Hangup()\n\n");

    let mut routes: Vec<&InboundRoute> = snapshot.routes.iter().filter(|r| r.enabled).collect();
    routes.sort_by(|a, b| a.did.cmp(&b.did));

    if routes.is_empty() {
        out.push_str("; No inbound routes configured\n");
        out.push_str("exten => _X.,1,NoOp(Unrouted inbound call to ${EXTEN})\n");
        out.push_str(" same => n,Hangup()\n");
    } else {
        for route in &routes {
            render_inbound_route(&mut out, route, snapshot, &forward_map, &ring_timeouts);
        }
    }

    out.push_str("\n; Catch-all for unmatched inbound calls\n");
    out.push_str("exten => _[+0-9].,1,NoOp(Unmatched inbound DID ${EXTEN})\n");
    out.push_str(" same => n,Hangup()\n");

    for menu in &menus {
        out.push_str(&ivr_context(menu));
    }

    out
}

fn render_inbound_route(
    out: &mut String,
    route: &InboundRoute,
    snapshot: &ConfigSnapshot,
    forward_map: &HashMap<&str, HashMap<ForwardType, &CallForward>>,
    ring_timeouts: &HashMap<&str, i32>,
) {
    let ext = route.destination_extension.as_str();
    let description = route.description.as_deref().unwrap_or(&route.did);

    let _ = writeln!(out, "\n; {}", description);
    let _ = writeln!(out, "exten => {},1,NoOp(Inbound call to DID {})", route.did, route.did);
    out.push_str(" same => n,Set(CALLERID(name)=${CALLERID(name)})\n");

    if let Some(menu) = snapshot.ivr_by_extension(ext) {
        out.push_str(" same => n,Answer()\n same => n,Wait(0.5)\n");
        let _ = writeln!(out, " same => n,Goto(ivr-{},s,1)", menu.id);
    } else if let Some(group) = snapshot.ring_group_by_extension(ext) {
        out.push_str(" same => n,Answer()\n same => n,Wait(0.5)\n");
        out.push_str(&ring_group_logic(group));
        out.push('\n');
    } else {
        let ring = ring_timeouts.get(ext).copied().unwrap_or(DEFAULT_RING_TIMEOUT);
        out.push_str(&dial_logic(ext, forward_map.get(ext), ring, true));
        out.push('\n');
    }
}

/// Dial an extension with optional forwarding and the voicemail fallback.
/// `early_answer` stabilizes the SIP dialog on inbound trunk calls before
/// the dial starts.
fn dial_logic(
    extension: &str,
    forwards: Option<&HashMap<ForwardType, &CallForward>>,
    ring_time: i32,
    early_answer: bool,
) -> String {
    let cfu = forwards.and_then(|m| m.get(&ForwardType::Unconditional));
    let cfb = forwards.and_then(|m| m.get(&ForwardType::Busy));
    let cfna = forwards.and_then(|m| m.get(&ForwardType::NoAnswer));

    let mut lines: Vec<String> = Vec::new();

    // Unconditional forward skips dialing the extension entirely.
    if let Some(cfu) = cfu {
        lines.push(format!(
            " same => n,NoOp(CFU active: forwarding to {})",
            cfu.destination
        ));
        if early_answer {
            lines.push(" same => n,Answer()".to_string());
            lines.push(" same => n,Wait(0.5)".to_string());
        }
        lines.push(format!(
            " same => n,Dial(PJSIP/{}@trunk,{},tT)",
            cfu.destination, ring_time
        ));
        lines.push(" same => n,Hangup()".to_string());
        return lines.join("\n");
    }

    if early_answer {
        lines.push(" same => n,Answer()".to_string());
        lines.push(" same => n,Wait(0.5)".to_string());
    }

    // Unreachable devices divert straight to voicemail instead of ringing
    // into the void.
    let actual_ring = cfna.map(|f| f.ring_time).unwrap_or(ring_time);
    lines.push(format!(
        " same => n,Set(DEVICE_STATE=${{DEVICE_STATE(PJSIP/{})}})",
        extension
    ));
    lines.push(" same => n,GotoIf($[\"${DEVICE_STATE}\" = \"UNAVAILABLE\"]?unavail)".to_string());
    lines.push(" same => n,GotoIf($[\"${DEVICE_STATE}\" = \"INVALID\"]?unavail)".to_string());
    lines.push(format!(
        " same => n,Dial(PJSIP/{},{},tTr)",
        extension, actual_ring
    ));

    match (cfb, cfna) {
        (Some(cfb), Some(cfna)) => {
            lines.push(" same => n,GotoIf($[\"${DIALSTATUS}\" = \"BUSY\"]?busy:noanswer)".to_string());
            lines.push(format!(
                " same => n(noanswer),NoOp(CFNA: forwarding to {})",
                cfna.destination
            ));
            lines.push(format!(" same => n,Dial(PJSIP/{}@trunk,30,tT)", cfna.destination));
            lines.push(format!(" same => n,VoiceMail({}@default,u)", extension));
            lines.push(" same => n,Hangup()".to_string());
            lines.push(format!(
                " same => n(busy),NoOp(CFB: forwarding to {})",
                cfb.destination
            ));
            lines.push(format!(" same => n,Dial(PJSIP/{}@trunk,30,tT)", cfb.destination));
            lines.push(format!(" same => n,VoiceMail({}@default,b)", extension));
            lines.push(" same => n,Hangup()".to_string());
        }
        (Some(cfb), None) => {
            lines.push(" same => n,GotoIf($[\"${DIALSTATUS}\" = \"BUSY\"]?busy:unavail)".to_string());
            lines.push(format!(" same => n(unavail),VoiceMail({}@default,u)", extension));
            lines.push(" same => n,Hangup()".to_string());
            lines.push(format!(
                " same => n(busy),NoOp(CFB: forwarding to {})",
                cfb.destination
            ));
            lines.push(format!(" same => n,Dial(PJSIP/{}@trunk,30,tT)", cfb.destination));
            lines.push(format!(" same => n,VoiceMail({}@default,b)", extension));
            lines.push(" same => n,Hangup()".to_string());
        }
        (None, Some(cfna)) => {
            lines.push(" same => n,GotoIf($[\"${DIALSTATUS}\" = \"BUSY\"]?busy:noanswer)".to_string());
            lines.push(format!(
                " same => n(noanswer),NoOp(CFNA: forwarding to {})",
                cfna.destination
            ));
            lines.push(format!(" same => n,Dial(PJSIP/{}@trunk,30,tT)", cfna.destination));
            lines.push(format!(" same => n,VoiceMail({}@default,u)", extension));
            lines.push(" same => n,Hangup()".to_string());
            lines.push(format!(" same => n(busy),VoiceMail({}@default,b)", extension));
            lines.push(" same => n,Hangup()".to_string());
        }
        (None, None) => {
            lines.push(" same => n,GotoIf($[\"${DIALSTATUS}\" = \"BUSY\"]?busy:unavail)".to_string());
            lines.push(format!(" same => n(unavail),VoiceMail({}@default,u)", extension));
            lines.push(" same => n,Hangup()".to_string());
            lines.push(format!(" same => n(busy),VoiceMail({}@default,b)", extension));
            lines.push(" same => n,Hangup()".to_string());
        }
    }

    lines.join("\n")
}

fn ring_group_logic(group: &RingGroup) -> String {
    format!(
        " same => n,Queue({},tT,,,{})\n same => n,Hangup()",
        group.queue_name(),
        group.ring_time
    )
}

/// Outbound dispatch: each extension with an assigned route dials out via
/// that route's trunk, presenting the route's DID as caller id.
fn render_outbound(out: &mut String, snapshot: &ConfigSnapshot) {
    let outbound = outbound_map(snapshot);
    if outbound.is_empty() {
        return;
    }

    out.push_str("; === Outbound calling via assigned trunks ===\n");
    for pattern in ["_0X.", "_+X."] {
        let label = if pattern == "_0X." {
            "Outbound call"
        } else {
            "Outbound intl call"
        };
        let _ = writeln!(
            out,
            "exten => {},1,NoOp({} from ${{CHANNEL(endpoint)}} to ${{EXTEN}})",
            pattern, label
        );
        for (ext, _) in &outbound {
            let _ = writeln!(
                out,
                " same => n,GotoIf($[\"${{CHANNEL(endpoint)}}x\" = \"{}x\"]?out-{})",
                ext, ext
            );
        }
        out.push_str(" same => n,NoOp(No outbound route for this extension)\n");
        out.push_str(" same => n,Playback(ss-noservice)\n same => n,Hangup()\n");

        for (ext, route) in &outbound {
            let _ = writeln!(
                out,
                "\n same => n(out-{}),NoOp(Outbound via trunk-ep-{} with CID {})",
                ext, route.trunk_id, route.did
            );
            let _ = writeln!(out, " same => n,Set(CALLERID(num)={})", route.did);
            let _ = writeln!(
                out,
                " same => n,Dial(PJSIP/${{EXTEN}}@trunk-ep-{},120,tT)",
                route.trunk_id
            );
            out.push_str(" same => n,Hangup()\n");
        }
        out.push('\n');
    }
}

/// extension -> the route whose DID it presents outbound. The peer's
/// configured outbound caller id wins when it matches one of its routes;
/// otherwise the first assigned route is used.
fn outbound_map(snapshot: &ConfigSnapshot) -> Vec<(&str, &InboundRoute)> {
    let mut routes_by_ext: HashMap<&str, Vec<&InboundRoute>> = HashMap::new();
    let mut sorted: Vec<&InboundRoute> = snapshot.routes.iter().filter(|r| r.enabled).collect();
    sorted.sort_by_key(|r| r.id);
    for route in sorted {
        routes_by_ext
            .entry(route.destination_extension.as_str())
            .or_default()
            .push(route);
    }

    let mut map: Vec<(&str, &InboundRoute)> = routes_by_ext
        .into_iter()
        .map(|(ext, routes)| {
            let preferred = snapshot
                .peers
                .iter()
                .find(|p| p.extension == ext)
                .and_then(|p| p.outbound_cid.as_deref())
                .and_then(|cid| routes.iter().find(|r| r.did == cid).copied());
            (ext, preferred.unwrap_or(routes[0]))
        })
        .collect();
    map.sort_by(|a, b| a.0.cmp(b.0));
    map
}

fn ivr_context(menu: &IvrMenu) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n[ivr-{}]", menu.id);
    out.push_str("exten => s,1,NoOp(IVR Menu)\n");
    out.push_str(" same => n,Set(IVR_TRIES=${IF($[\"${IVR_TRIES}\"=\"\"]?0:${IVR_TRIES})})\n");
    let _ = writeln!(out, " same => n,Set(IVR_MAX={})", menu.retries);
    out.push_str(" same => n,Answer()\n same => n,Wait(0.5)\n");
    if let Some(prompt) = menu.prompt.as_deref().filter(|p| !p.is_empty()) {
        let _ = writeln!(out, " same => n,Background({})", prompt);
    }
    let _ = writeln!(out, " same => n,WaitExten({})", menu.timeout_seconds);

    let mut options = menu.options.clone();
    options.sort_by_key(|o| o.position);
    for option in &options {
        let _ = writeln!(
            out,
            "exten => {},1,NoOp(IVR Option {} -> {})",
            option.digit, option.digit, option.destination
        );
        let _ = writeln!(out, " same => n,Goto(internal,{},1)", option.destination);
    }

    match menu.timeout_destination.as_deref().filter(|d| !d.is_empty()) {
        Some(fallback) => {
            out.push_str("exten => i,1,NoOp(IVR Invalid)\n");
            out.push_str(" same => n,Set(IVR_TRIES=$[${IVR_TRIES}+1])\n");
            out.push_str(" same => n,GotoIf($[${IVR_TRIES} <= ${IVR_MAX}]?s,1)\n");
            let _ = writeln!(out, " same => n,Goto(internal,{},1)", fallback);
            out.push_str("exten => t,1,NoOp(IVR Timeout)\n");
            out.push_str(" same => n,Set(IVR_TRIES=$[${IVR_TRIES}+1])\n");
            out.push_str(" same => n,GotoIf($[${IVR_TRIES} <= ${IVR_MAX}]?s,1)\n");
            let _ = writeln!(out, " same => n,Goto(internal,{},1)", fallback);
        }
        None => {
            out.push_str("exten => i,1,Playback(pbx-invalid)\n");
            out.push_str(" same => n,Set(IVR_TRIES=$[${IVR_TRIES}+1])\n");
            out.push_str(" same => n,GotoIf($[${IVR_TRIES} <= ${IVR_MAX}]?s,1)\n");
            out.push_str(" same => n,Hangup()\n");
            out.push_str("exten => t,1,Set(IVR_TRIES=$[${IVR_TRIES}+1])\n");
            out.push_str(" same => n,GotoIf($[${IVR_TRIES} <= ${IVR_MAX}]?s,1)\n");
            out.push_str(" same => n,Hangup()\n");
        }
    }

    out
}

const FEATURE_CODES: &str = "\
; Voicemail access - dial *98 to check voicemail
exten => *98,1,NoOp(Voicemail Access for ${CALLERID(num)})
 same => n,Answer()
 same => n,Wait(0.5)
 same => n,VoiceMailMain(${CALLERID(num)}@default)
 same => n,Hangup()

; Voicemail direct - dial *97 + extension
exten => _*97XXXX,1,NoOp(Direct Voicemail for ${EXTEN:3})
 same => n,Answer()
 same => n,Wait(0.5)
 same => n,VoiceMail(${EXTEN:3}@default)
 same => n,Hangup()

; Call pickup
exten => *8,1,NoOp(Call Pickup)
 same => n,Pickup()
 same => n,Hangup()

; Echo test
exten => *43,1,Answer()
 same => n,Echo()
 same => n,Hangup()
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::provision::snapshot::test_fixtures::*;

    #[test]
    fn test_unconditional_forward_short_circuits() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.peers.push(peer("1001", "pw"));
        snapshot.forwards.push(forward("1001", "unconditional", "0171234567"));
        snapshot.forwards.push(forward("1001", "busy", "1002"));

        let output = render(&snapshot);

        let block_start = output.find("exten => 1001,1,NoOp(Call to 1001").unwrap();
        let block = &output[block_start..];
        let block_end = block.find("\n\n").unwrap();
        let block = &block[..block_end];

        // CFU dials the forward target and never dials the extension.
        assert!(block.contains("CFU active: forwarding to 0171234567"));
        assert!(block.contains("Dial(PJSIP/0171234567@trunk"));
        assert!(!block.contains("Dial(PJSIP/1001,"));
        assert!(!block.contains("CFB"));
    }

    #[test]
    fn test_busy_and_no_answer_forwards_branch_on_dialstatus() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.forwards.push(forward("1001", "busy", "1002"));
        snapshot.forwards.push(forward("1001", "no_answer", "1003"));

        let output = render(&snapshot);

        assert!(output.contains("GotoIf($[\"${DIALSTATUS}\" = \"BUSY\"]?busy:noanswer)"));
        assert!(output.contains("n(noanswer),NoOp(CFNA: forwarding to 1003)"));
        assert!(output.contains("n(busy),NoOp(CFB: forwarding to 1002)"));
    }

    #[test]
    fn test_inbound_route_to_ring_group_uses_queue() {
        let mut snapshot = ConfigSnapshot::default();
        let mut rg = group(7, "Support", "600", &["1001", "1002"]);
        rg.inbound_trunk_id = Some(1);
        rg.inbound_did = Some("+4922166980".to_string());
        snapshot.ring_groups.push(rg);
        snapshot.routes.push(route(1, "+4922166980", 1, "600"));

        let output = render(&snapshot);

        let inbound = output.find("exten => +4922166980,1").unwrap();
        assert!(output[inbound..].contains("Queue(rg_7,tT,,,20)"));
    }

    #[test]
    fn test_disabled_route_renders_nothing() {
        let mut snapshot = ConfigSnapshot::default();
        let mut dead = route(1, "+4922166980", 1, "1001");
        dead.enabled = false;
        snapshot.routes.push(dead);

        let output = render(&snapshot);
        assert!(!output.contains("+4922166980"));
        assert!(output.contains("No inbound routes configured"));
    }

    #[test]
    fn test_outbound_uses_peer_outbound_cid_when_it_matches() {
        let mut snapshot = ConfigSnapshot::default();
        let mut p = peer("1001", "pw");
        p.outbound_cid = Some("+4922166981".to_string());
        snapshot.peers.push(p);
        snapshot.routes.push(route(1, "+4922166980", 2, "1001"));
        snapshot.routes.push(route(2, "+4922166981", 3, "1001"));

        let output = render(&snapshot);

        assert!(output.contains("Set(CALLERID(num)=+4922166981)"));
        assert!(output.contains("Dial(PJSIP/${EXTEN}@trunk-ep-3,120,tT)"));
    }

    #[test]
    fn test_custom_ring_timeout_gets_override_block() {
        let mut snapshot = ConfigSnapshot::default();
        let mut mb = mailbox("1001");
        mb.ring_timeout = 45;
        snapshot.mailboxes.push(mb);

        let output = render(&snapshot);
        assert!(output.contains("; Extension 1001 - custom rules"));
        assert!(output.contains("Dial(PJSIP/1001,45,tTr)"));
    }

    #[test]
    fn test_feature_codes_present() {
        let output = render(&ConfigSnapshot::default());
        assert!(output.contains("exten => *98,1"));
        assert!(output.contains("exten => _*97XXXX,1"));
        assert!(output.contains("exten => *8,1"));
        assert!(output.contains("exten => *43,1"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.peers.push(peer("1002", "a"));
        snapshot.peers.push(peer("1001", "b"));
        snapshot.routes.push(route(2, "+4922166981", 1, "1002"));
        snapshot.routes.push(route(1, "+4922166980", 1, "1001"));
        snapshot.forwards.push(forward("1002", "busy", "1001"));

        assert_eq!(render(&snapshot), render(&snapshot));
    }

    #[test]
    fn test_ivr_context_rendered_for_enabled_menu() {
        let mut snapshot = ConfigSnapshot::default();
        let mut m = menu(5, "Main", "500");
        m.options.push(crate::models::IvrOption {
            id: 1,
            menu_id: 5,
            digit: "1".to_string(),
            destination: "1001".to_string(),
            position: 1,
        });
        snapshot.ivr_menus.push(m);

        let output = render(&snapshot);

        assert!(output.contains("[ivr-5]"));
        assert!(output.contains("exten => 500,1,NoOp(IVR Main)"));
        assert!(output.contains("exten => 1,1,NoOp(IVR Option 1 -> 1001)"));
        assert!(output.contains("Background(main-menu)"));
    }
}

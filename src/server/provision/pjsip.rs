//! pjsip.conf renderer: endpoint/auth/aor sections for extensions, plus
//! registration or identify sections for trunks.
//!
//! Section naming is an external contract with the switch: peers use their
//! extension as the section name, trunks use `trunk-ep-{id}` and friends,
//! because the dialplan dials `PJSIP/{number}@trunk-ep-{id}`.

use std::fmt::Write;

use crate::models::{SipPeer, SipTrunk, TrunkAuthMode};

use super::ConfigSnapshot;

pub fn render(snapshot: &ConfigSnapshot) -> String {
    let mut peers: Vec<&SipPeer> = snapshot.peers.iter().filter(|p| p.enabled).collect();
    peers.sort_by(|a, b| a.extension.cmp(&b.extension));

    let mut trunks: Vec<&SipTrunk> = snapshot.trunks.iter().filter(|t| t.enabled).collect();
    trunks.sort_by_key(|t| t.id);

    let mut out = String::new();
    out.push_str(
        "; pjsip.conf - generated, do not edit by hand\n\
         \n\
         [global]\n\
         type=global\n\
         user_agent=PBX Admin\n\
         \n\
         [transport-udp]\n\
         type=transport\n\
         protocol=udp\n\
         bind=0.0.0.0:5060\n\n",
    );

    out.push_str("; === Extensions ===\n\n");
    for peer in &peers {
        render_peer(&mut out, peer, snapshot);
    }

    out.push_str("; === Trunks ===\n\n");
    for trunk in &trunks {
        render_trunk(&mut out, trunk);
    }

    out
}

fn render_peer(out: &mut String, peer: &SipPeer, snapshot: &ConfigSnapshot) {
    let ext = &peer.extension;

    let _ = writeln!(out, "[{}]", ext);
    out.push_str("type=endpoint\n");
    let _ = writeln!(out, "context={}", peer.context);
    out.push_str("disallow=all\nallow=ulaw,alaw,g722\n");
    let _ = writeln!(out, "auth={}", ext);
    let _ = writeln!(out, "aors={}", ext);
    if let Some(caller_id) = peer.caller_id.as_deref().filter(|c| !c.is_empty()) {
        let _ = writeln!(out, "callerid={} <{}>", caller_id, ext);
    }
    if snapshot.mailbox_for(ext).is_some() {
        let _ = writeln!(out, "mailboxes={}@default", ext);
    }
    out.push_str("direct_media=no\nrtp_symmetric=yes\nforce_rport=yes\nrewrite_contact=yes\n\n");

    let _ = writeln!(out, "[{}]", ext);
    out.push_str("type=auth\nauth_type=userpass\n");
    let _ = writeln!(out, "username={}", ext);
    let _ = writeln!(out, "password={}", peer.secret);
    out.push('\n');

    let _ = writeln!(out, "[{}]", ext);
    out.push_str("type=aor\nmax_contacts=1\nqualify_frequency=60\n\n");
}

fn render_trunk(out: &mut String, trunk: &SipTrunk) {
    let mode = trunk.auth_mode().unwrap_or(TrunkAuthMode::Registration);
    let username = trunk.username.as_deref().unwrap_or_default();
    let server = trunk.resolved_server().unwrap_or_default();

    let _ = writeln!(out, "; Trunk: {}", trunk.name);
    let _ = writeln!(out, "[{}]", trunk.endpoint_section());
    out.push_str("type=endpoint\n");
    let _ = writeln!(out, "context={}", trunk.context);
    out.push_str("disallow=all\n");
    let _ = writeln!(out, "allow={}", trunk.codecs);
    let _ = writeln!(out, "aors={}", trunk.aor_section());
    if mode == TrunkAuthMode::Registration {
        let _ = writeln!(out, "outbound_auth={}", trunk.auth_section());
    }
    if !username.is_empty() {
        let _ = writeln!(out, "from_user={}", username);
    }
    let _ = writeln!(out, "from_domain={}", server);
    out.push_str("direct_media=no\nrtp_symmetric=yes\n\n");

    if mode == TrunkAuthMode::Registration {
        let _ = writeln!(out, "[{}]", trunk.auth_section());
        out.push_str("type=auth\nauth_type=userpass\n");
        let _ = writeln!(out, "username={}", username);
        let _ = writeln!(
            out,
            "password={}",
            trunk.password.as_deref().unwrap_or_default()
        );
        out.push('\n');
    }

    let _ = writeln!(out, "[{}]", trunk.aor_section());
    out.push_str("type=aor\n");
    let _ = writeln!(out, "contact=sip:{}", server);
    out.push_str("qualify_frequency=60\n\n");

    match mode {
        TrunkAuthMode::Registration => {
            let _ = writeln!(out, "[{}]", trunk.registration_section());
            out.push_str("type=registration\n");
            let _ = writeln!(out, "outbound_auth={}", trunk.auth_section());
            let _ = writeln!(out, "server_uri=sip:{}", server);
            let _ = writeln!(out, "client_uri=sip:{}@{}", username, server);
            let _ = writeln!(out, "endpoint={}", trunk.endpoint_section());
            out.push_str("retry_interval=60\nforbidden_retry_interval=300\nexpiration=3600\nline=yes\n\n");
        }
        TrunkAuthMode::Ip => {
            let _ = writeln!(out, "[{}]", trunk.identify_section());
            out.push_str("type=identify\n");
            let _ = writeln!(out, "endpoint={}", trunk.endpoint_section());
            let _ = writeln!(out, "match={}", server);
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::provision::snapshot::test_fixtures::*;

    #[test]
    fn test_enabled_peer_renders_with_secret() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.peers.push(peer("1002", "S3cr3t!"));

        let output = render(&snapshot);

        assert!(output.contains("[1002]\ntype=endpoint\n"));
        assert!(output.contains("password=S3cr3t!"));
        // No mailbox configured, so the endpoint must not announce one.
        assert!(!output.contains("mailboxes=1002@default"));
    }

    #[test]
    fn test_disabled_peer_is_absent_not_commented() {
        let mut snapshot = ConfigSnapshot::default();
        let mut disabled = peer("1003", "pw");
        disabled.enabled = false;
        snapshot.peers.push(disabled);

        let output = render(&snapshot);
        assert!(!output.contains("1003"));
    }

    #[test]
    fn test_registration_trunk_renders_registration_section() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.trunks.push(trunk(3, "Plusnet", "registration"));

        let output = render(&snapshot);

        assert!(output.contains("[trunk-ep-3]"));
        assert!(output.contains("[trunk-auth-3]"));
        assert!(output.contains("[trunk-reg-3]\ntype=registration\n"));
        assert!(output.contains("client_uri=sip:user3@sip.ipfonie.de"));
        assert!(!output.contains("[trunk-id-3]"));
    }

    #[test]
    fn test_ip_trunk_renders_identify_section() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.trunks.push(trunk(4, "Fixed", "ip"));

        let output = render(&snapshot);

        assert!(output.contains("[trunk-id-4]\ntype=identify\n"));
        assert!(!output.contains("[trunk-reg-4]"));
        assert!(!output.contains("[trunk-auth-4]"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.peers.push(peer("1002", "a"));
        snapshot.peers.push(peer("1001", "b"));
        snapshot.trunks.push(trunk(1, "One", "registration"));

        assert_eq!(render(&snapshot), render(&snapshot));
        // Sorted by extension regardless of input order.
        let output = render(&snapshot);
        assert!(output.find("[1001]").unwrap() < output.find("[1002]").unwrap());
    }

    #[test]
    fn test_peer_with_mailbox_gets_mwi() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.peers.push(peer("1001", "pw"));
        snapshot.mailboxes.push(mailbox("1001"));

        let output = render(&snapshot);
        assert!(output.contains("mailboxes=1001@default"));
    }
}

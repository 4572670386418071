//! Snapshot reads for config generation.
//!
//! All queries are ordered so the same database state always produces the
//! same snapshot, which keeps rendering deterministic end to end.

use std::collections::HashMap;

use sqlx::PgPool;

use crate::models::{
    CallForward, InboundRoute, IvrMenu, IvrOption, RingGroup, SipPeer, SipTrunk, VoicemailBox,
};
use crate::server::provision::ConfigSnapshot;

pub async fn load(pool: &PgPool) -> Result<ConfigSnapshot, sqlx::Error> {
    let peers = peers(pool).await?;
    let trunks = trunks(pool).await?;
    let routes = routes(pool).await?;
    let forwards = forwards(pool).await?;
    let ring_groups = ring_groups(pool).await?;
    let mailboxes = mailboxes(pool).await?;
    let ivr_menus = ivr_menus(pool).await?;

    Ok(ConfigSnapshot {
        peers,
        trunks,
        routes,
        forwards,
        ring_groups,
        mailboxes,
        ivr_menus,
    })
}

pub async fn peers(pool: &PgPool) -> Result<Vec<SipPeer>, sqlx::Error> {
    sqlx::query_as::<_, SipPeer>(
        r#"
        SELECT id, extension, secret, caller_id, context,
               outbound_cid, blf_enabled, enabled, created_at, updated_at
        FROM sip_peers
        ORDER BY extension
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn trunks(pool: &PgPool) -> Result<Vec<SipTrunk>, sqlx::Error> {
    sqlx::query_as::<_, SipTrunk>(
        r#"
        SELECT id, name, provider, auth_mode, sip_server, username, password,
               caller_id, number_block, context, codecs, enabled,
               created_at, updated_at
        FROM sip_trunks
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn routes(pool: &PgPool) -> Result<Vec<InboundRoute>, sqlx::Error> {
    sqlx::query_as::<_, InboundRoute>(
        r#"
        SELECT id, did, trunk_id, destination_extension, description,
               enabled, created_at, updated_at
        FROM inbound_routes
        ORDER BY did
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn forwards(pool: &PgPool) -> Result<Vec<CallForward>, sqlx::Error> {
    sqlx::query_as::<_, CallForward>(
        r#"
        SELECT id, extension, forward_type, destination, ring_time,
               enabled, created_at, updated_at
        FROM call_forwards
        ORDER BY extension, forward_type
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn ring_groups(pool: &PgPool) -> Result<Vec<RingGroup>, sqlx::Error> {
    let mut groups = sqlx::query_as::<_, RingGroup>(
        r#"
        SELECT id, name, extension, inbound_trunk_id, inbound_did,
               strategy, ring_time, enabled, created_at, updated_at
        FROM ring_groups
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let members: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT group_id, extension
        FROM ring_group_members
        ORDER BY group_id, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_group: HashMap<i64, Vec<String>> = HashMap::new();
    for (group_id, extension) in members {
        by_group.entry(group_id).or_default().push(extension);
    }
    for group in &mut groups {
        group.members = by_group.remove(&group.id).unwrap_or_default();
    }

    Ok(groups)
}

pub async fn mailboxes(pool: &PgPool) -> Result<Vec<VoicemailBox>, sqlx::Error> {
    sqlx::query_as::<_, VoicemailBox>(
        r#"
        SELECT id, extension, enabled, pin, name, email, ring_timeout,
               created_at, updated_at
        FROM voicemail_mailboxes
        ORDER BY extension
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn ivr_menus(pool: &PgPool) -> Result<Vec<IvrMenu>, sqlx::Error> {
    let mut menus = sqlx::query_as::<_, IvrMenu>(
        r#"
        SELECT id, name, extension, prompt, timeout_seconds, retries,
               timeout_destination, inbound_trunk_id, inbound_did, enabled,
               created_at, updated_at
        FROM ivr_menus
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let options = sqlx::query_as::<_, IvrOption>(
        r#"
        SELECT id, menu_id, digit, destination, position
        FROM ivr_options
        ORDER BY menu_id, position
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut by_menu: HashMap<i64, Vec<IvrOption>> = HashMap::new();
    for option in options {
        by_menu.entry(option.menu_id).or_default().push(option);
    }
    for menu in &mut menus {
        menu.options = by_menu.remove(&menu.id).unwrap_or_default();
    }

    Ok(menus)
}

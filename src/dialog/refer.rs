//! REFER/Replaces transfer state machine: `Received → {Rejected
//! | BlindForwarded | AttendedInProgress → AttendedComplete}`. A thin
//! orchestration layer over [`crate::dialog::manager::DialogueManager`]'s
//! primitives — it holds no state of its own.

use crate::dialog::manager::DialogueManager;
use crate::error::{Error, Result};
use crate::ids::DialogueId;
use crate::transport::InboundTransaction;
use std::net::SocketAddr;
use tracing::warn;

#[derive(Debug, PartialEq, Eq)]
enum ReferTarget {
    Blind,
    Attended { replaces_raw: String },
}

fn parse_refer_to(value: &str) -> Result<ReferTarget> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::ParseFault {
            what: "Refer-To",
            reason: "empty header value".to_string(),
        });
    }

    match trimmed.find("Replaces=") {
        None => Ok(ReferTarget::Blind),
        Some(start) => {
            let after = &trimmed[start + "Replaces=".len()..];
            let end = after.find(['&', '>']).unwrap_or(after.len());
            let raw = &after[..end];
            if raw.is_empty() {
                return Err(Error::ParseFault {
                    what: "Refer-To",
                    reason: "empty Replaces parameter".to_string(),
                });
            }
            Ok(ReferTarget::Attended {
                replaces_raw: raw.to_string(),
            })
        }
    }
}

fn header_value(headers: &rsip::Headers, name: &str) -> Option<String> {
    headers.iter().find_map(|header| match header {
        rsip::Header::Other(header_name, value) if header_name.eq_ignore_ascii_case(name) => {
            Some(value.clone())
        }
        _ => None,
    })
}

/// Entry point for an inbound REFER. `d` is the dialogue it arrived on.
pub(crate) async fn handle_refer(
    manager: &DialogueManager,
    d: DialogueId,
    txn: InboundTransaction,
    local_ep: SocketAddr,
    remote_ep: SocketAddr,
) -> Result<()> {
    let Some(refer_to) = header_value(&txn.request.headers, "Refer-To") else {
        manager.respond_to_refer(&txn, 400, "Bad Request").await.ok();
        return Ok(());
    };

    let target = match parse_refer_to(&refer_to) {
        Ok(target) => target,
        Err(err) => {
            warn!(%err, "handle_refer: failed to parse Refer-To");
            manager.respond_to_refer(&txn, 400, "Bad Request").await.ok();
            return Ok(());
        }
    };

    let replaces_raw = match target {
        ReferTarget::Blind => {
            return manager.forward_in_dialogue(d, txn, local_ep, remote_ep).await;
        }
        ReferTarget::Attended { replaces_raw } => replaces_raw,
    };

    let replaces_dialogue = match manager.index().get_by_replaces(&replaces_raw) {
        Ok(Some(dialogue)) => dialogue,
        Ok(None) => return manager.forward_in_dialogue(d, txn, local_ep, remote_ep).await,
        Err(err) => {
            warn!(%err, "handle_refer: get_by_replaces failed");
            return manager.forward_in_dialogue(d, txn, local_ep, remote_ep).await;
        }
    };

    handle_attended_refer(manager, d, replaces_dialogue.id, txn, local_ep, remote_ep).await
}

async fn handle_attended_refer(
    manager: &DialogueManager,
    d: DialogueId,
    r: DialogueId,
    txn: InboundTransaction,
    local_ep: SocketAddr,
    remote_ep: SocketAddr,
) -> Result<()> {
    let dialogue_d = match manager.get(d) {
        Ok(dialogue) => dialogue,
        Err(err) => {
            warn!(%err, "attended refer: failed to load referring dialogue");
            manager.respond_to_refer(&txn, 500, "Internal Server Error").await.ok();
            return Ok(());
        }
    };
    let replaces_dialogue = match manager.get(r) {
        Ok(dialogue) => dialogue,
        Err(err) => {
            warn!(%err, "attended refer: failed to load replaced dialogue");
            manager.respond_to_refer(&txn, 500, "Internal Server Error").await.ok();
            return Ok(());
        }
    };

    let rem = match manager.index().get_opposite(&replaces_dialogue) {
        Ok(rem) => rem,
        Err(err) => {
            warn!(%err, "attended refer: failed to look up replaced leg's peer");
            manager.respond_to_refer(&txn, 500, "Internal Server Error").await.ok();
            return Ok(());
        }
    };
    let rem2 = match manager.index().get_opposite(&dialogue_d) {
        Ok(rem2) => rem2,
        Err(err) => {
            warn!(%err, "attended refer: failed to look up referring leg's peer");
            manager.respond_to_refer(&txn, 500, "Internal Server Error").await.ok();
            return Ok(());
        }
    };
    let (Some(rem), Some(rem2)) = (rem, rem2) else {
        return manager.forward_in_dialogue(d, txn, local_ep, remote_ep).await;
    };

    let (rem, rem2) = match manager.rebridge(rem.id, rem2.id).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(%err, "attended refer: failed to rebridge opposite legs");
            manager.respond_to_refer(&txn, 500, "Internal Server Error").await.ok();
            return Ok(());
        }
    };

    if let Err(err) = manager.respond_to_refer(&txn, 202, "Accepted").await {
        warn!(%err, "attended refer: failed to send 202 Accepted");
    }

    let progress_subscription_state = format!("active;expires={}", manager.config.refer_notify_expires);
    if let Err(err) = manager
        .send_notify(d, "SIP/2.0 100 Trying", &progress_subscription_state)
        .await
    {
        warn!(%err, "attended refer: failed to send progress NOTIFY");
    }

    let rem_sdp = rem.remote_sdp.clone().unwrap_or_default();
    let rem2_sdp = rem2.remote_sdp.clone().unwrap_or_default();
    let (first, second) = tokio::join!(
        manager.reinvite(rem.id, rem2_sdp),
        manager.reinvite(rem2.id, rem_sdp),
    );
    if let Err(err) = first {
        warn!(%err, "attended refer: re-INVITE of first leg failed");
    }
    if let Err(err) = second {
        warn!(%err, "attended refer: re-INVITE of second leg failed");
    }

    if let Err(err) = manager
        .send_notify(d, "SIP/2.0 200 OK", "terminated;reason=noresource")
        .await
    {
        warn!(%err, "attended refer: failed to send completion NOTIFY");
    }

    // Step 7: both original legs are dead regardless of the above outcomes.
    // No rollback on mid-sequence failure.
    if let Err(err) = manager.terminate_leg(d, "Attended transfer").await {
        warn!(%err, "attended refer: failed to terminate referring leg");
    }
    if let Err(err) = manager.terminate_leg(r, "Attended transfer").await {
        warn!(%err, "attended refer: failed to terminate replaced leg");
    }

    Ok(())
}

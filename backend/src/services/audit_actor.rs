//! Provenance for audit records: who triggered a mutation and from where.
//!
//! Explicit values always win. Otherwise the current [`RequestContext`] is
//! consulted; outside a request every resolver returns `None`.

use crate::{
    middleware::request_context::RequestContext,
    models::actor::{ActorProfile, ResolvedActor},
};

pub fn resolve_actor(explicit: Option<&ActorProfile>) -> ResolvedActor {
    match explicit {
        Some(profile) => resolved_from(profile),
        None => RequestContext::current()
            .and_then(|ctx| ctx.principal)
            .map(|profile| resolved_from(&profile))
            .unwrap_or_default(),
    }
}

pub fn determine_ip(explicit: Option<&str>) -> Option<String> {
    non_blank(explicit).or_else(|| RequestContext::current().and_then(|ctx| ctx.client_ip()))
}

pub fn determine_user_agent(explicit: Option<&str>) -> Option<String> {
    non_blank(explicit).or_else(|| RequestContext::current().and_then(|ctx| ctx.user_agent))
}

fn resolved_from(profile: &ActorProfile) -> ResolvedActor {
    ResolvedActor {
        id: profile.id,
        email: non_blank(profile.email.as_deref()),
        name: display_name(profile),
    }
}

/// Full name, then "first last", then username.
fn display_name(profile: &ActorProfile) -> Option<String> {
    if let Some(full_name) = non_blank(profile.full_name.as_deref()) {
        return Some(full_name);
    }
    let parts: Vec<String> = [profile.first_name.as_deref(), profile.last_name.as_deref()]
        .into_iter()
        .filter_map(non_blank)
        .collect();
    if !parts.is_empty() {
        return Some(parts.join(" "));
    }
    non_blank(profile.username.as_deref())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

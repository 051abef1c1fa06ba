// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::AsicError;
use aal::AsicResult;
use common::ports::PortFec;

use super::codec::base_page_fec;
use super::codec::consortium_fec_quad;
use super::codec::is_extended_tech_page;
use super::codec::page_technologies;
use super::AnFec;
use super::AnSpeeds;
use super::Codeword;
use super::FecBand;
use super::HcdResult;
use super::Technology;

// Pick the highest-priority technology in the set.  On a tie, the first one
// seen (lowest bit) is kept.
fn highest_priority(common: AnSpeeds) -> Option<Technology> {
    let mut best: Option<Technology> = None;
    for t in common.technologies() {
        match best {
            Some(b) if t.priority() <= b.priority() => {}
            _ => best = Some(t),
        }
    }
    best
}

fn base_page_fec_mode(t: Technology, local: AnFec, remote: AnFec) -> PortFec {
    let either = local | remote;
    match t.fec_band() {
        FecBand::BaseR => {
            let able = local.contains(AnFec::BASE_R_ABILITY)
                && remote.contains(AnFec::BASE_R_ABILITY);
            if able && either.contains(AnFec::BASE_R_REQUEST) {
                PortFec::Firecode
            } else {
                PortFec::None
            }
        }
        FecBand::Rs25G => {
            let both = |f: AnFec| local.contains(f) && remote.contains(f);
            let one = |f: AnFec| either.contains(f);
            // The -S subset variant only turns on FEC that both ends ask
            // for.
            let full = t != Technology::Base25GKrS;
            if both(AnFec::RS_REQUEST_25G)
                || (one(AnFec::RS_REQUEST_25G) && full)
            {
                PortFec::Rs
            } else if both(AnFec::BASE_R_REQUEST_25G)
                || (one(AnFec::BASE_R_REQUEST_25G) && full)
            {
                PortFec::Firecode
            } else {
                PortFec::None
            }
        }
        FecBand::RsOnly => PortFec::Rs,
        FecBand::None | FecBand::Consortium => PortFec::None,
    }
}

/// Resolve the highest common denominator from the local and remote base
/// pages.
pub fn resolve(local: Codeword, remote: Codeword) -> HcdResult {
    let common = page_technologies(local, false).collect::<AnSpeeds>()
        & page_technologies(remote, false).collect::<AnSpeeds>();
    let Some(t) = highest_priority(common) else {
        return HcdResult::NONE;
    };

    HcdResult {
        speed: t.speed(),
        lane_count: t.lane_count(),
        fec: base_page_fec_mode(
            t,
            base_page_fec(local),
            base_page_fec(remote),
        ),
    }
}

/// Resolve the highest common denominator from the consortium's unformatted
/// next pages.  This is only meaningful when the base pages have no
/// technology in common.
pub fn resolve_from_next_page(local: Codeword, remote: Codeword) -> HcdResult {
    let common = page_technologies(local, true).collect::<AnSpeeds>()
        & page_technologies(remote, true).collect::<AnSpeeds>();
    let Some(t) = highest_priority(common) else {
        return HcdResult::NONE;
    };

    let (ld_f1, ld_f2, ld_f3, ld_f4) = consortium_fec_quad(local);
    let (rd_f1, rd_f2, rd_f3, rd_f4) = consortium_fec_quad(remote);
    let fec = if t == Technology::Consortium400GCr8 {
        PortFec::Rs
    } else if ld_f1 && rd_f1 && (ld_f3 || rd_f3) {
        PortFec::Rs
    } else if ld_f2 && rd_f2 && (ld_f4 || rd_f4) {
        PortFec::Firecode
    } else {
        PortFec::None
    };

    HcdResult {
        speed: t.speed(),
        lane_count: t.lane_count(),
        fec,
    }
}

/// Resolve a full exchange of pages: the base pages decide, unless they have
/// nothing in common and both partners sent the consortium's extended
/// technology page.
pub fn resolve_pages(
    local: &[Codeword],
    remote: &[Codeword],
) -> AsicResult<HcdResult> {
    let (Some(local_base), Some(remote_base)) = (local.first(), remote.first())
    else {
        return Err(AsicError::InvalidArg(
            "resolution needs a base page from both partners".into(),
        ));
    };

    let hcd = resolve(*local_base, *remote_base);
    if !hcd.is_none() {
        return Ok(hcd);
    }
    match (local.get(2), remote.get(2)) {
        (Some(l), Some(r))
            if is_extended_tech_page(*l) && is_extended_tech_page(*r) =>
        {
            Ok(resolve_from_next_page(*l, *r))
        }
        _ => Ok(hcd),
    }
}

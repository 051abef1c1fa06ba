// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::AsicError;
use aal::AsicResult;

use super::AnFec;
use super::AnPause;
use super::AnSpeeds;
use super::AutonegAdvertisement;
use super::Codeword;
use super::PageBit;
use super::Technology;

// Base page
const SELECTOR_LO: u32 = 0;
const SELECTOR_WIDTH: u32 = 5;
const SELECTOR_IEEE_802_3: u64 = 0b00001;
const PAUSE_C0: u32 = 10;
const PAUSE_C1: u32 = 11;
const NEXT_PAGE: u32 = 15;
const FEC_F2: u32 = 44;
const FEC_F3: u32 = 45;
const FEC_F0: u32 = 46;
const FEC_F1: u32 = 47;

// Both next pages
const MESSAGE_PAGE: u32 = 13;

// Formatted (OUI-tagged message) next page
const MSG_CODE_LO: u32 = 0;
const MSG_CODE_WIDTH: u32 = 11;
const MSG_CODE_OUI_TAGGED: u64 = 5;
const OUI_HI_LO: u32 = 16;
const OUI_MID_LO: u32 = 32;
const OUI_FIELD_WIDTH: u32 = 11;

// Unformatted next page.  The 9-bit code shares the low 11 bits with OUI[1:0],
// so for the consortium OUI those bits read 0x203.
const UNP_CODE_LO: u32 = 0;
const UNP_CODE_WIDTH: u32 = 9;
const UNP_CODE_EXTENDED_TECH: u64 = 0x003;
const OUI_LO_LO: u32 = 9;
const OUI_LO_WIDTH: u32 = 2;
const CONS_FEC_F1: u32 = 40;
const CONS_FEC_F2: u32 = 41;
const CONS_FEC_F3: u32 = 42;
const CONS_FEC_F4: u32 = 43;

const MAX_PAGES: usize = 3;
const MAX_OUI: u32 = 0xff_ffff;

// The base page FEC bits, paired with the `AnFec` flags they carry.
const BASE_FEC_BITS: [(u32, AnFec); 4] = [
    (FEC_F0, AnFec::BASE_R_ABILITY),
    (FEC_F1, AnFec::BASE_R_REQUEST),
    (FEC_F2, AnFec::RS_REQUEST_25G),
    (FEC_F3, AnFec::BASE_R_REQUEST_25G),
];

const CONSORTIUM_FEC_BITS: [(u32, AnFec); 4] = [
    (CONS_FEC_F1, AnFec::CONSORTIUM_RS_ABILITY),
    (CONS_FEC_F2, AnFec::CONSORTIUM_BASE_R_ABILITY),
    (CONS_FEC_F3, AnFec::CONSORTIUM_RS_REQUEST),
    (CONS_FEC_F4, AnFec::CONSORTIUM_BASE_R_REQUEST),
];

/// Is this next page the consortium's unformatted extended-technology page?
pub(super) fn is_extended_tech_page(page: Codeword) -> bool {
    !page.bit(MESSAGE_PAGE)
        && page.field(UNP_CODE_LO, UNP_CODE_WIDTH) == UNP_CODE_EXTENDED_TECH
}

/// The FEC quad of an unformatted next page, as (F1, F2, F3, F4).
pub(super) fn consortium_fec_quad(page: Codeword) -> (bool, bool, bool, bool) {
    (
        page.bit(CONS_FEC_F1),
        page.bit(CONS_FEC_F2),
        page.bit(CONS_FEC_F3),
        page.bit(CONS_FEC_F4),
    )
}

/// The FEC flags carried by a base page.
pub(super) fn base_page_fec(page: Codeword) -> AnFec {
    let mut fec = AnFec::empty();
    for (bit, flag) in BASE_FEC_BITS {
        if page.bit(bit) {
            fec.insert(flag);
        }
    }
    fec
}

/// The technologies advertised on a single page.
pub(super) fn page_technologies(
    page: Codeword,
    next_page: bool,
) -> impl Iterator<Item = Technology> {
    use strum::IntoEnumIterator;
    Technology::iter().filter(move |t| match t.page_bit() {
        PageBit::Base(bit) => !next_page && page.bit(bit),
        PageBit::NextPage(bit) => next_page && page.bit(bit),
    })
}

fn validate(adv: &AutonegAdvertisement) -> AsicResult<()> {
    if adv.speeds.intersects(AnSpeeds::UNDEFINED) {
        return Err(AsicError::InvalidArg(format!(
            "undefined speed bits: {:#x}",
            (adv.speeds & AnSpeeds::UNDEFINED).bits()
        )));
    }
    if adv.fec.intersects(AnFec::UNDEFINED) {
        return Err(AsicError::InvalidArg(format!(
            "undefined fec bits: {:#x}",
            (adv.fec & AnFec::UNDEFINED).bits()
        )));
    }
    for t in adv.speeds.technologies() {
        match t.exclusive_with() {
            Some(peer) if t < peer && adv.speeds.has(peer) => {
                return Err(AsicError::InvalidArg(format!(
                    "{t} and {peer} are mutually exclusive"
                )));
            }
            _ => {}
        }
    }
    if adv.consortium_oui > MAX_OUI {
        return Err(AsicError::InvalidArg(format!(
            "oui {:#x} is wider than 24 bits",
            adv.consortium_oui
        )));
    }
    match (adv.needs_next_pages(), adv.consortium_oui != 0) {
        (true, false) => Err(AsicError::InvalidArg(
            "consortium abilities require an oui".into(),
        )),
        (false, true) => Err(AsicError::InvalidArg(
            "oui given without any consortium ability".into(),
        )),
        _ => Ok(()),
    }
}

/// Encode an advertisement as the pages to be sent: the base page alone, or
/// the base page followed by the consortium's formatted and unformatted next
/// pages.
pub fn encode(adv: &AutonegAdvertisement) -> AsicResult<Vec<Codeword>> {
    validate(adv)?;

    let mut base = Codeword::default();
    base.set_field(SELECTOR_LO, SELECTOR_WIDTH, SELECTOR_IEEE_802_3);
    base.set_bit(PAUSE_C0, adv.pause.rx);
    base.set_bit(PAUSE_C1, adv.pause.tx);
    for (bit, flag) in BASE_FEC_BITS {
        base.set_bit(bit, adv.fec.contains(flag));
    }

    let mut unformatted = Codeword::default();
    for t in adv.speeds.technologies() {
        match t.page_bit() {
            PageBit::Base(bit) => base.set_bit(bit, true),
            PageBit::NextPage(bit) => unformatted.set_bit(bit, true),
        }
    }

    if !adv.needs_next_pages() {
        return Ok(vec![base]);
    }
    base.set_bit(NEXT_PAGE, true);

    let oui = u64::from(adv.consortium_oui);
    let mut formatted = Codeword::default();
    formatted.set_field(MSG_CODE_LO, MSG_CODE_WIDTH, MSG_CODE_OUI_TAGGED);
    formatted.set_bit(MESSAGE_PAGE, true);
    formatted.set_bit(NEXT_PAGE, true);
    formatted.set_field(OUI_HI_LO, OUI_FIELD_WIDTH, oui >> 13);
    formatted.set_field(OUI_MID_LO, OUI_FIELD_WIDTH, oui >> 2);

    unformatted.set_field(UNP_CODE_LO, UNP_CODE_WIDTH, UNP_CODE_EXTENDED_TECH);
    unformatted.set_field(OUI_LO_LO, OUI_LO_WIDTH, oui);
    for (bit, flag) in CONSORTIUM_FEC_BITS {
        unformatted.set_bit(bit, adv.fec.contains(flag));
    }

    Ok(vec![base, formatted, unformatted])
}

/// Decode the pages received from a link partner.  Fields carried by pages
/// that weren't received are left at zero.
pub fn decode(pages: &[Codeword]) -> AsicResult<AutonegAdvertisement> {
    let Some(base) = pages.first() else {
        return Err(AsicError::InvalidArg("no base page".into()));
    };
    if pages.len() > MAX_PAGES {
        return Err(AsicError::InvalidArg(format!(
            "{} pages received, at most {MAX_PAGES} expected",
            pages.len()
        )));
    }
    let selector = base.field(SELECTOR_LO, SELECTOR_WIDTH);
    if selector != SELECTOR_IEEE_802_3 {
        return Err(AsicError::InvalidArg(format!(
            "unsupported selector {selector:#x}"
        )));
    }

    let mut adv = AutonegAdvertisement {
        speeds: page_technologies(*base, false).collect(),
        pause: AnPause {
            rx: base.bit(PAUSE_C0),
            tx: base.bit(PAUSE_C1),
        },
        fec: base_page_fec(*base),
        consortium_oui: 0,
    };

    if let Some(formatted) = pages.get(1) {
        let code = formatted.field(MSG_CODE_LO, MSG_CODE_WIDTH);
        if !formatted.bit(MESSAGE_PAGE) || code != MSG_CODE_OUI_TAGGED {
            return Err(AsicError::InvalidArg(format!(
                "expected an oui-tagged message page, found code {code:#x}"
            )));
        }
        let hi = formatted.field(OUI_HI_LO, OUI_FIELD_WIDTH) as u32;
        let mid = formatted.field(OUI_MID_LO, OUI_FIELD_WIDTH) as u32;
        adv.consortium_oui = (hi << 13) | (mid << 2);
    }

    if let Some(unformatted) = pages.get(2) {
        if !is_extended_tech_page(*unformatted) {
            return Err(AsicError::InvalidArg(format!(
                "expected an extended technology page, found code {:#x}",
                unformatted.field(UNP_CODE_LO, UNP_CODE_WIDTH)
            )));
        }
        let lo = unformatted.field(OUI_LO_LO, OUI_LO_WIDTH) as u32;
        adv.consortium_oui |= lo;
        adv.speeds.insert(page_technologies(*unformatted, true).collect());
        for (bit, flag) in CONSORTIUM_FEC_BITS {
            if unformatted.bit(bit) {
                adv.fec.insert(flag);
            }
        }
    }

    Ok(adv)
}

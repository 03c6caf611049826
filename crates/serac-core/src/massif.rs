//! Massif enumeration
//!
//! Avalanche bulletins are published per massif. The set of massifs is fixed
//! by Météo-France; anything else is rejected before it reaches the
//! coordination layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::sanitize::sanitize_identifier;

/// Errors raised when building a [`MassifId`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MassifError {
    #[error("unknown massif id {0}")]
    Unknown(u16),
}

/// Numeric id, display name and upstream text id
pub const MASSIFS: &[(u16, &str, &str)] = &[
    // Northern Alps
    (1, "Chablais", "CHABLAIS"),
    (2, "Aravis", "ARAVIS"),
    (3, "Mont-Blanc", "MONT-BLANC"),
    (4, "Bauges", "BAUGES"),
    (5, "Beaufortain", "BEAUFORTAIN"),
    (6, "Haute-Tarentaise", "HAUTE-TARENTAISE"),
    (7, "Chartreuse", "CHARTREUSE"),
    (8, "Belledonne", "BELLEDONNE"),
    (9, "Maurienne", "MAURIENNE"),
    (10, "Vanoise", "VANOISE"),
    (11, "Haute-Maurienne", "HAUTE-MAURIENNE"),
    (12, "Grandes-Rousses", "GRANDES-ROUSSES"),
    (13, "Thabor", "THABOR"),
    (14, "Vercors", "VERCORS"),
    (15, "Oisans", "OISANS"),
    (16, "Pelvoux", "PELVOUX"),
    // Southern Alps
    (17, "Queyras", "QUEYRAS"),
    (18, "Dévoluy", "DEVOLUY"),
    (19, "Champsaur", "CHAMPSAUR"),
    (20, "Embrunais-Parpaillon", "EMBRUNAIS-PARPAILLON"),
    (21, "Ubaye", "UBAYE"),
    (22, "Mercantour", "MERCANTOUR"),
    (23, "Alpes-Azur", "ALPES-AZUR"),
    // Pyrenees
    (40, "Pays-Basque", "PAYS-BASQUE"),
    (41, "Aspe-Ossau", "ASPE-OSSAU"),
    (42, "Haute-Bigorre", "HAUTE-BIGORRE"),
    (43, "Aure-Louron", "AURE-LOURON"),
    (44, "Luchonnais", "LUCHONNAIS"),
    (45, "Couserans", "COUSERANS"),
    (46, "Haute-Ariège", "HAUTE-ARIEGE"),
    (47, "Orlu-St-Barthélémy", "ORLU-ST-BARTHELEMY"),
    (48, "Capcir-Puymorens", "CAPCIR-PUYMORENS"),
    (49, "Cerdagne-Canigou", "CERDAGNE-CANIGOU"),
    (50, "Andorre", "ANDORRE"),
    // Corsica
    (70, "Corse", "CORSE"),
];

/// A validated massif id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct MassifId(u16);

impl MassifId {
    pub fn new(id: u16) -> Result<Self, MassifError> {
        if MASSIFS.iter().any(|(known, _, _)| *known == id) {
            Ok(Self(id))
        } else {
            Err(MassifError::Unknown(id))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    fn row(self) -> &'static (u16, &'static str, &'static str) {
        // Construction guarantees the id is in the table
        MASSIFS
            .iter()
            .find(|(id, _, _)| *id == self.0)
            .unwrap_or(&(0, "Unknown", "UNKNOWN"))
    }

    /// Display name, diacritics preserved
    pub fn name(self) -> &'static str {
        self.row().1
    }

    /// Upstream text id (e.g. `MONT-BLANC`)
    pub fn text_id(self) -> &'static str {
        self.row().2
    }

    /// Identifier fragment used inside entity ids
    pub fn slug(self) -> String {
        sanitize_identifier(self.name())
    }

    /// Every known massif, in table order
    pub fn all() -> impl Iterator<Item = MassifId> {
        MASSIFS.iter().map(|(id, _, _)| MassifId(*id))
    }
}

impl TryFrom<u16> for MassifId {
    type Error = MassifError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<MassifId> for u16 {
    fn from(id: MassifId) -> u16 {
        id.0
    }
}

impl fmt::Display for MassifId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

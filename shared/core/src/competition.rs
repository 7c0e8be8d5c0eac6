use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a model competition on the network. The numeric value is
/// what gets persisted and sent over the wire, the name is for humans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum CompetitionId {
    /// 770M parameter class.
    M770,
    /// 3B parameter class.
    B3,
    /// 7B parameter class.
    B7,
    /// 14B parameter class.
    B14,
    /// Tiny class used on testnets and in smoke tests.
    S1,
}

impl CompetitionId {
    pub const ALL: [CompetitionId; 5] = [
        CompetitionId::M770,
        CompetitionId::B3,
        CompetitionId::B7,
        CompetitionId::B14,
        CompetitionId::S1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CompetitionId::M770 => "m770",
            CompetitionId::B3 => "b3",
            CompetitionId::B7 => "b7",
            CompetitionId::B14 => "b14",
            CompetitionId::S1 => "s1",
        }
    }
}

impl From<CompetitionId> for u16 {
    fn from(id: CompetitionId) -> u16 {
        match id {
            CompetitionId::M770 => 1,
            CompetitionId::B3 => 2,
            CompetitionId::B7 => 3,
            CompetitionId::B14 => 4,
            CompetitionId::S1 => 100,
        }
    }
}

impl TryFrom<u16> for CompetitionId {
    type Error = UnknownCompetition;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CompetitionId::M770),
            2 => Ok(CompetitionId::B3),
            3 => Ok(CompetitionId::B7),
            4 => Ok(CompetitionId::B14),
            100 => Ok(CompetitionId::S1),
            _ => Err(UnknownCompetition::Id(value)),
        }
    }
}

impl fmt::Display for CompetitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CompetitionId {
    type Err = UnknownCompetition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m770" => Ok(CompetitionId::M770),
            "b3" => Ok(CompetitionId::B3),
            "b7" => Ok(CompetitionId::B7),
            "b14" => Ok(CompetitionId::B14),
            "s1" => Ok(CompetitionId::S1),
            other => Err(UnknownCompetition::Name(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnknownCompetition {
    #[error("unknown competition id {0}")]
    Id(u16),
    #[error("unknown competition name \"{0}\"")]
    Name(String),
    #[error("competition {0} has no scheduled constraints")]
    NotScheduled(u16),
}

/// Which pretrained tokenizer vocabulary a competition's models assume.
/// Pages served by data providers are already tokenized, so this is only
/// persisted alongside checkpoints so downstream consumers can decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenizerKind {
    NeoX,
    Llama,
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TokenizerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenizerKind::NeoX => "neox",
            TokenizerKind::Llama => "llama",
        }
    }
}

/// Architecture hyperparameters a participant model must be built with.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub max_position_embeddings: usize,
}

/// Everything a competition pins down about admissible entries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelConstraints {
    pub model: LmConfig,
    pub tokenizer: TokenizerKind,
    pub max_sequence_length: usize,
}

const M770_CONSTRAINTS: ModelConstraints = ModelConstraints {
    model: LmConfig {
        vocab_size: 50304,
        hidden_size: 1024,
        max_position_embeddings: 2048,
    },
    tokenizer: TokenizerKind::NeoX,
    max_sequence_length: 2048,
};

const B3_CONSTRAINTS: ModelConstraints = ModelConstraints {
    model: LmConfig {
        vocab_size: 32000,
        hidden_size: 2560,
        max_position_embeddings: 4096,
    },
    tokenizer: TokenizerKind::Llama,
    max_sequence_length: 4096,
};

const B7_CONSTRAINTS: ModelConstraints = ModelConstraints {
    model: LmConfig {
        vocab_size: 32000,
        hidden_size: 4096,
        max_position_embeddings: 4096,
    },
    tokenizer: TokenizerKind::Llama,
    max_sequence_length: 4096,
};

const S1_CONSTRAINTS: ModelConstraints = ModelConstraints {
    model: LmConfig {
        vocab_size: 256,
        hidden_size: 32,
        max_position_embeddings: 64,
    },
    tokenizer: TokenizerKind::NeoX,
    max_sequence_length: 64,
};

pub fn constraints_for(id: CompetitionId) -> Option<&'static ModelConstraints> {
    match id {
        CompetitionId::M770 => Some(&M770_CONSTRAINTS),
        CompetitionId::B3 => Some(&B3_CONSTRAINTS),
        CompetitionId::B7 => Some(&B7_CONSTRAINTS),
        // announced but not scheduled yet
        CompetitionId::B14 => None,
        CompetitionId::S1 => Some(&S1_CONSTRAINTS),
    }
}

pub fn lookup_constraints(
    id: CompetitionId,
) -> Result<&'static ModelConstraints, UnknownCompetition> {
    constraints_for(id).ok_or(UnknownCompetition::NotScheduled(id.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids_round_trip() {
        for id in CompetitionId::ALL {
            let wire: u16 = id.into();
            assert_eq!(CompetitionId::try_from(wire), Ok(id));
        }
        assert!(CompetitionId::try_from(99).is_err());
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("m770".parse::<CompetitionId>(), Ok(CompetitionId::M770));
        assert_eq!("B3".parse::<CompetitionId>(), Ok(CompetitionId::B3));
        assert!("b999".parse::<CompetitionId>().is_err());
    }

    #[test]
    fn serde_uses_numeric_ids() {
        let json = serde_json::to_string(&CompetitionId::B7).unwrap();
        assert_eq!(json, "3");
        let back: CompetitionId = serde_json::from_str("3").unwrap();
        assert_eq!(back, CompetitionId::B7);
    }

    #[test]
    fn scheduled_competitions_have_constraints() {
        for id in [CompetitionId::M770, CompetitionId::B3, CompetitionId::B7] {
            let constraints = lookup_constraints(id).unwrap();
            assert!(constraints.model.vocab_size > 0);
            assert!(constraints.max_sequence_length <= constraints.model.max_position_embeddings);
        }
        assert_eq!(
            lookup_constraints(CompetitionId::B14),
            Err(UnknownCompetition::NotScheduled(4))
        );
    }
}

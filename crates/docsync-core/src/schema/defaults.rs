//! Derivation tables for analyzers and index field names.
//!
//! Both tables are keyed by (type, multiplicity). A `None` entry means no
//! default exists and the descriptor must spell the value out.

use super::{Analyzer, FieldType};

pub fn default_analyzer(field_type: FieldType, multi_valued: bool) -> Option<Analyzer> {
    match (field_type, multi_valued) {
        (FieldType::String, false) => Some(Analyzer::String),
        (FieldType::String, true) => Some(Analyzer::Strings),
        (FieldType::Text, _) => Some(Analyzer::TextEn),
        (FieldType::Int, false) => Some(Analyzer::Int),
        (FieldType::Int, true) => Some(Analyzer::Ints),
        (FieldType::Boolean, false) => Some(Analyzer::Boolean),
        (FieldType::Boolean, true) => Some(Analyzer::Booleans),
        (FieldType::Datetime, false) => Some(Analyzer::Tdate),
        (FieldType::Datetime, true) => Some(Analyzer::Tdates),
        (FieldType::Point, _) => Some(Analyzer::Location),
        (FieldType::Float, _) => None,
    }
}

pub fn index_field_suffix(field_type: FieldType, multi_valued: bool) -> Option<&'static str> {
    match (field_type, multi_valued) {
        (FieldType::String, false) => Some("_s"),
        (FieldType::String, true) => Some("_ss"),
        (FieldType::Text, _) => Some("_en"),
        (FieldType::Int, false) => Some("_i"),
        (FieldType::Int, true) => Some("_is"),
        (FieldType::Boolean, false) => Some("_b"),
        (FieldType::Boolean, true) => Some("_bs"),
        (FieldType::Datetime, false) => Some("_dt"),
        (FieldType::Datetime, true) => Some("_dts"),
        (FieldType::Point, _) => Some("_pt"),
        (FieldType::Float, _) => None,
    }
}

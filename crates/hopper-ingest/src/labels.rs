//! Label documents and the records built from them
//!
//! Label JSON is read through one accessor, [`LabelDocument::text`], with a
//! single fallback rule: anything that is not a string, number or boolean at
//! the end of the path reads as `""`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One step into a JSON document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seg {
    Key(&'static str),
    Index(usize),
}

use Seg::{Index, Key};

const DIALOG_ID: &[Seg] = &[Key("DialogID")];
const CATEGORY: &[Seg] = &[Key("Category")];
const SUBCATEGORY: &[Seg] = &[Key("SubCategory")];
const GENDER: &[Seg] = &[Key("Speakers"), Index(0), Key("Gender")];
const AGE: &[Seg] = &[Key("Speakers"), Index(0), Key("AgeGroup")];
const DIALECT: &[Seg] = &[Key("Speakers"), Index(0), Key("Locate")];
const TEXT: &[Seg] = &[Key("Dialogs"), Index(0), Key("SpeakerText")];
const WORD_TYPE: &[Seg] = &[Key("Dialogs"), Index(0), Key("WordInfo"), Index(0), Key("WordType")];
const WORD_DEFINE: &[Seg] = &[Key("Dialogs"), Index(0), Key("WordInfo"), Index(0), Key("WordDefine")];

/// Parsed label file
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDocument(Value);

impl LabelDocument {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes).map(Self)
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Value at `path` rendered as text, or `""`
    pub fn text(&self, path: &[Seg]) -> String {
        let found = path.iter().try_fold(&self.0, |node, seg| match seg {
            Key(key) => node.get(key),
            Index(idx) => node.get(idx),
        });

        match found {
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
            _ => String::new(),
        }
    }

    /// Build the record for the audio file at `audio`, staged from archive pair `pair_id`
    pub fn to_record(&self, pair_id: &str, id: impl Into<String>, audio: &Path) -> IngestionRecord {
        IngestionRecord {
            pair_id: pair_id.to_string(),
            id: id.into(),
            audio: audio.to_string_lossy().into_owned(),
            text: self.text(TEXT),
            gender: self.text(GENDER),
            age: self.text(AGE),
            dialect: self.text(DIALECT),
            category: self.text(CATEGORY),
            subcategory: self.text(SUBCATEGORY),
            dialog_id: self.text(DIALOG_ID),
            word_type: self.text(WORD_TYPE),
            word_define: self.text(WORD_DEFINE),
        }
    }
}

/// One published sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRecord {
    /// Archive pair the files came from; stems are only unique within a pair
    pub pair_id: String,
    /// Shared stem of the audio and label files
    pub id: String,
    /// Path of the audio file
    pub audio: String,
    pub text: String,
    pub gender: String,
    pub age: String,
    pub dialect: String,
    pub category: String,
    pub subcategory: String,
    pub dialog_id: String,
    pub word_type: String,
    pub word_define: String,
}

use serde::Deserialize;
use serde::Serialize;

/// A candidate as read from an upload: identity from the form, the rest from the spreadsheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub name: String,
    pub surname: String,
    pub seniority: String,
    pub years: i64,
    pub availability: bool,
}

/// A record after it was saved, with the id the store assigned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCandidate {
    pub id: u64,
    #[serde(flatten)]
    pub record: CandidateRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_candidate_serializes_flat() {
        let stored = StoredCandidate {
            id: 1,
            record: CandidateRecord {
                name: "John".to_owned(),
                surname: "Doe".to_owned(),
                seniority: "junior".to_owned(),
                years: 3,
                availability: true,
            },
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json, serde_json::json!({
            "id": 1,
            "name": "John",
            "surname": "Doe",
            "seniority": "junior",
            "years": 3,
            "availability": true,
        }));
        assert_eq!(serde_json::from_value::<StoredCandidate>(json).unwrap(), stored);
    }
}

use std::{
    fs::{read_to_string, write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use geojson::FeatureCollection;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    bbox::BBox,
    llm::{Assistant, Directive, ExpectedGeometry, Request, Turn},
    overpass::{self, GeodataSource},
};

/// One conversation, kept across `ask` invocations through a history file.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub history: Vec<Turn>,
}

pub enum Outcome {
    Reply(String),
    Layer {
        name: String,
        notes: String,
        expected_geometry: ExpectedGeometry,
        collection: FeatureCollection,
    },
}

impl Session {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            serde_json::from_str(&read_to_string(path)?)
                .with_context(|| format!("failed to parse history file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut contents = serde_json::to_string_pretty(self)?;
        contents.push('\n');
        write(path, contents)?;
        Ok(())
    }

    /// Turns pushed before a failure stay in the history.
    pub fn ask(
        &mut self,
        assistant: &impl Assistant,
        source: &impl GeodataSource,
        message: &str,
        bbox: &BBox,
        language: &str,
    ) -> Result<Outcome> {
        let message = message.trim();
        if message.is_empty() {
            bail!("Please enter a query.");
        }

        self.history.push(Turn::user(message));
        let directive = assistant.directive(&Request {
            message,
            bbox,
            history: &self.history,
            language,
        })?;

        match directive {
            Directive::Chat { message } => {
                self.history.push(Turn::assistant(message.clone()));
                Ok(Outcome::Reply(message))
            }
            Directive::Query {
                description,
                overpass_query,
                expected_geometry,
                notes,
            } => {
                info!("Fetching {description}");
                self.history
                    .push(Turn::assistant(format!("Executing query: {description}")));

                let collection = overpass::fetch_geojson(source, &overpass_query)?;
                self.history.push(Turn::assistant(format!(
                    "Successfully added layer: {description}"
                )));

                Ok(Outcome::Layer {
                    name: description,
                    notes,
                    expected_geometry,
                    collection,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::anyhow;
    use serde_json::{json, Value};

    use super::*;
    use crate::llm::Role;

    struct Scripted {
        directive: Directive,
        history_len: RefCell<Option<usize>>,
    }

    impl Assistant for Scripted {
        fn directive(&self, request: &Request) -> Result<Directive> {
            *self.history_len.borrow_mut() = Some(request.history.len());
            Ok(self.directive.clone())
        }
    }

    struct Fixed(Option<Value>);

    impl GeodataSource for Fixed {
        fn query(&self, _q: &str) -> Result<Value> {
            self.0.clone().ok_or_else(|| anyhow!("connection refused"))
        }
    }

    fn bbox() -> BBox {
        "139.6,35.5,139.9,35.8".parse().unwrap()
    }

    fn query(description: &str) -> Directive {
        Directive::Query {
            description: description.to_string(),
            overpass_query: "[out:json]; node(1); out geom;".to_string(),
            expected_geometry: ExpectedGeometry::Point,
            notes: String::new(),
        }
    }

    #[test]
    fn chat_reply_is_recorded() {
        let assistant = Scripted {
            directive: Directive::Chat {
                message: "Which area?".to_string(),
            },
            history_len: RefCell::default(),
        };
        let mut session = Session::default();

        let outcome = session
            .ask(&assistant, &Fixed(None), " hello ", &bbox(), "en")
            .unwrap();

        assert!(matches!(outcome, Outcome::Reply(x) if x == "Which area?"));
        assert_eq!(*assistant.history_len.borrow(), Some(1));
        assert_eq!(
            session.history,
            vec![Turn::user("hello"), Turn::assistant("Which area?")]
        );
    }

    #[test]
    fn query_fetches_layer() {
        let assistant = Scripted {
            directive: query("Cafes"),
            history_len: RefCell::default(),
        };
        let source = Fixed(Some(json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 35.6, "lon": 139.7, "tags": {"amenity": "cafe"}},
                {"type": "relation", "id": 2}
            ]
        })));
        let mut session = Session::default();

        let outcome = session
            .ask(&assistant, &source, "cafes", &bbox(), "en")
            .unwrap();

        let Outcome::Layer {
            name, collection, ..
        } = outcome
        else {
            panic!("expected a layer");
        };
        assert_eq!(name, "Cafes");
        assert_eq!(collection.features.len(), 1);
        let replies: Vec<_> = session
            .history
            .iter()
            .filter(|x| x.role == Role::Assistant)
            .map(|x| x.content.as_str())
            .collect();
        assert_eq!(
            replies,
            ["Executing query: Cafes", "Successfully added layer: Cafes"]
        );
    }

    #[test]
    fn empty_message_is_rejected() {
        let assistant = Scripted {
            directive: query("Cafes"),
            history_len: RefCell::default(),
        };
        let mut session = Session::default();
        assert!(session
            .ask(&assistant, &Fixed(None), "   ", &bbox(), "en")
            .is_err());
        assert!(session.history.is_empty());
        assert_eq!(*assistant.history_len.borrow(), None);
    }

    #[test]
    fn fetch_failure_keeps_history() {
        let assistant = Scripted {
            directive: query("Parks"),
            history_len: RefCell::default(),
        };
        let mut session = Session::default();

        let err = session
            .ask(&assistant, &Fixed(None), "parks", &bbox(), "en")
            .err()
            .expect("fetch should fail");
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(session.history.len(), 2);
    }

    #[test]
    fn malformed_response_is_not_an_empty_layer() {
        let assistant = Scripted {
            directive: query("Parks"),
            history_len: RefCell::default(),
        };
        let mut session = Session::default();
        let result = session.ask(
            &assistant,
            &Fixed(Some(json!({"remark": "timeout"}))),
            "parks",
            &bbox(),
            "en",
        );
        assert!(result.is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        assert_eq!(Session::load(&path).unwrap(), Session::default());

        let session = Session {
            history: vec![Turn::user("parks"), Turn::assistant("Which city?")],
        };
        session.save(&path).unwrap();
        assert_eq!(Session::load(&path).unwrap(), session);
    }
}

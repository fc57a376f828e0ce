// ABOUTME: Dispatch table of tenant-scoped agent operations with argument validation
// ABOUTME: One generic request type replaces a hand-written method per operation

//! Tenant-scoped operations.
//!
//! Every pass-through call the gateway offers is one row of this table: an
//! [`Operation`] name plus the parameters it accepts. Callers build an
//! [`OperationRequest`] from a JSON argument object; validation happens here,
//! before anything reaches a tenant's agent client.
//!
//! # Example
//!
//! ```ignore
//! let request = OperationRequest::new(
//!     Operation::PointCreate,
//!     json!({"foc": "feed", "lid": "thermostat", "pid": "temperature"}),
//! )?;
//! let outcome = manager.invoke("ep-1", "token", request).await?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{GatewayError, GatewayResult};

// === Feed or Control ===

/// Data-flow direction of a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Foc {
    /// Publishes data to followers
    Feed,
    /// Accepts asks/tells from attached parties
    Control,
}

impl Foc {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for Foc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Foc {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feed" => Ok(Self::Feed),
            "control" => Ok(Self::Control),
            other => Err(GatewayError::MalformedRequest(format!(
                "foc must be 'feed' or 'control', got '{other}'"
            ))),
        }
    }
}

// === Parameter Table ===

/// Shape a parameter value must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// String; must be non-empty when required
    Text,
    /// Non-negative integer (limits, offsets)
    Count,
    /// Boolean
    Flag,
    /// "feed" or "control"
    Foc,
    /// Array of non-empty strings
    Tags,
    /// Non-negative number
    Seconds,
    /// Object with numeric `lat`, `long` and `radius`
    Location,
    /// Any non-null JSON value
    Any,
}

/// One accepted parameter of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: ParamKind) -> Param {
    Param {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: ParamKind) -> Param {
    Param {
        name,
        kind,
        required: false,
    }
}

use ParamKind::{Any, Count, Flag, Location, Seconds, Tags, Text};

const LID: Param = req("lid", Text);
const PID: Param = req("pid", Text);
const FOC: Param = req("foc", ParamKind::Foc);
const LIMIT: Param = opt("limit", Count);
const OFFSET: Param = opt("offset", Count);
const FMT: Param = opt("fmt", Text);
const LANG: Param = opt("lang", Text);
const TAGS: Param = req("tags", Tags);
const DELETE: Param = opt("delete", Flag);
const MIME: Param = opt("mime", Text);
const DATA: Param = req("data", Any);
const SUB_ID: Param = req("sub_id", Text);

// Operation-specific parameters
const EPID: Param = opt("epid", Text);
const NEW_LID: Param = req("new_lid", Text);
const NEW_EPID: Param = opt("new_epid", Text);
const META: Param = req("meta", Text);
const PUBLIC: Param = opt("public", Flag);
const NEW_PID: Param = req("new_pid", Text);
const SUCCESS: Param = opt("success", Flag);
const REQUEST_ID: Param = opt("request_id", Text);
const LABEL: Param = req("label", Text);
const VTYPE: Param = req("vtype", Text);
const COMMENT: Param = opt("comment", Text);
const UNIT: Param = opt("unit", Text);
const GPID: Param = req("gpid", Text);
const SLID: Param = req("slid", Text);
const TIMEOUT: Param = req("timeout", Seconds);
const TEXT: Param = opt("text", Text);
const LOCATION: Param = opt("location", Location);
const TYPE: Param = opt("type", Text);
const LOCAL: Param = opt("local", Flag);
const GUID: Param = req("guid", Text);

// === Operations ===

/// Every tenant-scoped operation the gateway can forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EntityCreate,
    EntityRename,
    EntityReassign,
    EntityDelete,
    EntityList,
    EntityListAll,
    EntityMetaGet,
    EntityMetaSet,
    EntityMetaSetPublic,
    EntityTagCreate,
    EntityTagDelete,
    EntityTagList,
    PointCreate,
    PointRename,
    PointConfirmTell,
    PointDelete,
    PointList,
    PointListDetailed,
    PointMetaGet,
    PointMetaSet,
    PointValueCreate,
    PointValueDelete,
    PointValueList,
    PointTagCreate,
    PointTagDelete,
    PointTagList,
    PointShare,
    SubCreate,
    SubCreateLocal,
    SubAsk,
    SubTell,
    SubDelete,
    SubList,
    Search,
    Describe,
}

impl Operation {
    /// All operations, in table order
    pub const ALL: [Self; 35] = [
        Self::EntityCreate,
        Self::EntityRename,
        Self::EntityReassign,
        Self::EntityDelete,
        Self::EntityList,
        Self::EntityListAll,
        Self::EntityMetaGet,
        Self::EntityMetaSet,
        Self::EntityMetaSetPublic,
        Self::EntityTagCreate,
        Self::EntityTagDelete,
        Self::EntityTagList,
        Self::PointCreate,
        Self::PointRename,
        Self::PointConfirmTell,
        Self::PointDelete,
        Self::PointList,
        Self::PointListDetailed,
        Self::PointMetaGet,
        Self::PointMetaSet,
        Self::PointValueCreate,
        Self::PointValueDelete,
        Self::PointValueList,
        Self::PointTagCreate,
        Self::PointTagDelete,
        Self::PointTagList,
        Self::PointShare,
        Self::SubCreate,
        Self::SubCreateLocal,
        Self::SubAsk,
        Self::SubTell,
        Self::SubDelete,
        Self::SubList,
        Self::Search,
        Self::Describe,
    ];

    /// Wire name of the operation
    pub const fn name(self) -> &'static str {
        match self {
            Self::EntityCreate => "entity_create",
            Self::EntityRename => "entity_rename",
            Self::EntityReassign => "entity_reassign",
            Self::EntityDelete => "entity_delete",
            Self::EntityList => "entity_list",
            Self::EntityListAll => "entity_list_all",
            Self::EntityMetaGet => "entity_meta_get",
            Self::EntityMetaSet => "entity_meta_set",
            Self::EntityMetaSetPublic => "entity_meta_setpublic",
            Self::EntityTagCreate => "entity_tag_create",
            Self::EntityTagDelete => "entity_tag_delete",
            Self::EntityTagList => "entity_tag_list",
            Self::PointCreate => "point_create",
            Self::PointRename => "point_rename",
            Self::PointConfirmTell => "point_confirm_tell",
            Self::PointDelete => "point_delete",
            Self::PointList => "point_list",
            Self::PointListDetailed => "point_list_detailed",
            Self::PointMetaGet => "point_meta_get",
            Self::PointMetaSet => "point_meta_set",
            Self::PointValueCreate => "point_value_create",
            Self::PointValueDelete => "point_value_delete",
            Self::PointValueList => "point_value_list",
            Self::PointTagCreate => "point_tag_create",
            Self::PointTagDelete => "point_tag_delete",
            Self::PointTagList => "point_tag_list",
            Self::PointShare => "point_share",
            Self::SubCreate => "sub_create",
            Self::SubCreateLocal => "sub_create_local",
            Self::SubAsk => "sub_ask",
            Self::SubTell => "sub_tell",
            Self::SubDelete => "sub_delete",
            Self::SubList => "sub_list",
            Self::Search => "search",
            Self::Describe => "describe",
        }
    }

    /// Look up an operation by wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Parameters accepted by this operation
    pub const fn params(self) -> &'static [Param] {
        match self {
            Self::EntityCreate => &[LID, EPID],
            Self::EntityRename => &[LID, NEW_LID],
            Self::EntityReassign => &[LID, NEW_EPID],
            Self::EntityDelete => &[LID],
            Self::EntityList | Self::EntityListAll => &[LIMIT, OFFSET],
            Self::EntityMetaGet => &[LID, FMT],
            Self::EntityMetaSet => &[LID, META, FMT],
            Self::EntityMetaSetPublic => &[LID, PUBLIC],
            Self::EntityTagCreate => &[LID, TAGS, LANG, DELETE],
            Self::EntityTagDelete => &[LID, TAGS, LANG],
            Self::EntityTagList => &[LID, LIMIT, OFFSET],
            Self::PointCreate | Self::PointDelete | Self::PointListDetailed => &[FOC, LID, PID],
            Self::PointRename => &[FOC, LID, PID, NEW_PID],
            Self::PointConfirmTell => {
                &[FOC, LID, PID, SUCCESS, REQUEST_ID]
            }
            Self::PointList => &[FOC, LID, LIMIT, OFFSET],
            Self::PointMetaGet => &[FOC, LID, PID, FMT],
            Self::PointMetaSet => &[FOC, LID, PID, META, FMT],
            Self::PointValueCreate => &[
                LID,
                PID,
                FOC,
                LABEL,
                VTYPE,
                LANG,
                COMMENT,
                UNIT,
            ],
            Self::PointValueDelete => &[LID, PID, FOC, LABEL, LANG],
            Self::PointValueList => &[LID, PID, FOC, LIMIT, OFFSET],
            Self::PointTagCreate => &[FOC, LID, PID, TAGS, LANG, DELETE],
            Self::PointTagDelete => &[FOC, LID, PID, TAGS, LANG],
            Self::PointTagList => &[FOC, LID, PID, LIMIT, OFFSET],
            Self::PointShare => &[LID, PID, DATA, MIME],
            Self::SubCreate => &[LID, FOC, GPID],
            Self::SubCreateLocal => &[SLID, FOC, LID, PID],
            Self::SubAsk => &[SUB_ID, DATA, MIME],
            Self::SubTell => &[SUB_ID, DATA, TIMEOUT, MIME],
            Self::SubDelete => &[SUB_ID],
            Self::SubList => &[LID, LIMIT, OFFSET],
            Self::Search => &[
                TEXT,
                LANG,
                LOCATION,
                UNIT,
                TYPE,
                LOCAL,
                LIMIT,
                OFFSET,
            ],
            Self::Describe => &[GUID, LOCAL],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// === Requests ===

/// A validated operation plus its argument bundle
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    operation: Operation,
    args: Map<String, Value>,
}

impl OperationRequest {
    /// Validate `args` against the operation's parameter table.
    ///
    /// `args` must be a JSON object (or null for no arguments). Optional
    /// parameters given as null are dropped.
    pub fn new(operation: Operation, args: Value) -> GatewayResult<Self> {
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(malformed(format!(
                    "{operation}: arguments must be an object, got {}",
                    type_name(&other)
                )))
            }
        };

        let params = operation.params();
        if let Some(unknown) = args.keys().find(|k| !params.iter().any(|p| p.name == k.as_str())) {
            return Err(malformed(format!("{operation}: unknown argument '{unknown}'")));
        }

        for param in params {
            match args.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(malformed(format!(
                        "{operation}: missing argument '{}'",
                        param.name
                    )));
                }
                None => {}
                Some(Value::Null) => {
                    args.remove(param.name);
                }
                Some(value) => check_param(operation, param, value)?,
            }
        }

        let request = Self { operation, args };
        request.check_cross_field()?;
        Ok(request)
    }

    /// Build a request from a wire operation name
    pub fn parse(name: &str, args: Value) -> GatewayResult<Self> {
        let operation =
            Operation::from_name(name).ok_or_else(|| malformed(format!("unknown operation '{name}'")))?;
        Self::new(operation, args)
    }

    pub const fn operation(&self) -> Operation {
        self.operation
    }

    pub const fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// String argument, if present
    pub fn text(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    /// Point direction, for operations that take one
    pub fn foc(&self) -> Option<Foc> {
        self.text("foc").and_then(|s| s.parse().ok())
    }

    /// Rewrite aliases into the form agent clients understand.
    ///
    /// Tag deletes are tag creates with `delete = true`.
    #[must_use]
    pub fn normalized(self) -> Self {
        let target = match self.operation {
            Operation::EntityTagDelete => Operation::EntityTagCreate,
            Operation::PointTagDelete => Operation::PointTagCreate,
            _ => return self,
        };
        let mut args = self.args;
        args.insert("delete".to_string(), Value::Bool(true));
        Self {
            operation: target,
            args,
        }
    }

    fn check_cross_field(&self) -> GatewayResult<()> {
        if self.operation == Operation::Search {
            if ["text", "location", "unit"].iter().all(|k| !self.args.contains_key(*k)) {
                return Err(malformed("search: one of 'text', 'location' or 'unit' is required"));
            }
            if let Some(kind) = self.text("type") {
                if !matches!(kind, "full" | "reduced" | "located") {
                    return Err(malformed(format!(
                        "search: type must be full, reduced or located, got '{kind}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_param(operation: Operation, param: &Param, value: &Value) -> GatewayResult<()> {
    let name = param.name;
    let ok = match param.kind {
        Text => value
            .as_str()
            .is_some_and(|s| !(param.required && s.trim().is_empty())),
        Count => value.as_u64().is_some(),
        Flag => value.is_boolean(),
        ParamKind::Foc => {
            let Some(s) = value.as_str() else {
                return Err(malformed(format!("{operation}: '{name}' must be a string")));
            };
            s.parse::<Foc>()?;
            true
        }
        Tags => value.as_array().is_some_and(|tags| {
            tags.iter()
                .all(|t| t.as_str().is_some_and(|s| !s.trim().is_empty()))
        }),
        Seconds => value.as_f64().is_some_and(|n| n >= 0.0),
        Location => value.as_object().is_some_and(|loc| {
            ["lat", "long", "radius"]
                .iter()
                .all(|k| loc.get(*k).is_some_and(Value::is_number))
        }),
        Any => true,
    };

    if ok {
        Ok(())
    } else {
        Err(malformed(format!(
            "{operation}: '{name}' must be {}, got {}",
            describe(param.kind),
            type_name(value)
        )))
    }
}

const fn describe(kind: ParamKind) -> &'static str {
    match kind {
        Text => "a non-empty string",
        Count => "a non-negative integer",
        Flag => "a boolean",
        ParamKind::Foc => "'feed' or 'control'",
        Tags => "a list of non-empty strings",
        Seconds => "a non-negative number",
        Location => "an object with numeric lat, long and radius",
        Any => "any value",
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn malformed(message: impl Into<String>) -> GatewayError {
    GatewayError::MalformedRequest(message.into())
}

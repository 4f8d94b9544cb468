//! Dynamic filter language for export queries.
//!
//! Query parameters follow a naming convention: a bare column name means
//! equality, and a small set of prefixes select other predicates
//! (`ilike<col>`, `filter_d_up_<col>`, `filter_n_lo_<col>`, ...). The same
//! rule table ([`rules::FILTER_RULES`]) drives both [`translate`] and the
//! API parameter documentation in [`swagger`], so what is documented is
//! exactly what is accepted.
//!
//! ```
//! use geoexports_core::{ColumnInfo, ColumnType};
//! use geoexports_filter::{FilterOperator, FilterParams, translate};
//!
//! let columns = vec![ColumnInfo::new("count", ColumnType::Integer)];
//! let params = FilterParams::from_query_string("filter_n_up_count=10&limit=20");
//! let clauses = translate(&params, &columns).unwrap();
//! assert_eq!(clauses.len(), 1);
//! assert_eq!(clauses[0].operator, FilterOperator::NumGte);
//! ```

pub mod clause;
pub mod error;
pub mod params;
pub mod parser;
pub mod rules;
pub mod swagger;

pub use clause::{FilterClause, FilterValue};
pub use error::{ClauseError, FilterError};
pub use params::FilterParams;
pub use parser::{match_parameter, translate};
pub use rules::{ColumnFamily, FILTER_RULES, FilterOperator, FilterRule, RESERVED_PARAMS};
pub use swagger::{DEFAULT_LIMIT, ParameterDescriptor, parameters_for};

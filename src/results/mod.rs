mod mapper;
mod result_set;
mod row;

pub use mapper::{RawRows, RowMapper};
pub use result_set::ResultSet;
pub use row::{Columns, DbRow};

use chrono::{DateTime, Local, TimeZone};

pub const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now() -> DateTime<Local> {
    Local::now()
}

pub fn row_timestamp<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.format(ROW_TIMESTAMP_FORMAT).to_string()
}

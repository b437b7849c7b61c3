use std::fmt::Write as _;

use anyhow::{
  Context,
  anyhow
};
use chrono::format::{
  Item,
  StrftimeItems
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  Local,
  NaiveDate,
  NaiveDateTime,
  Timelike,
  Weekday
};
use regex::Regex;

/// Layouts accepted for a stored or typed
/// deadline, most specific first.
const DEADLINE_LAYOUTS: [&str; 4] = [
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M"
];

pub const DEFAULT_DISPLAY_FORMAT: &str =
  "%Y-%m-%d %H:%M";

/// Wall-clock "now" without a zone, the
/// same frame deadlines are stored in.
pub fn local_now() -> NaiveDateTime {
  whole_seconds(
    Local::now().naive_local()
  )
}

/// Drops sub-second precision, which
/// the storage form cannot carry.
pub fn whole_seconds(
  dt: NaiveDateTime
) -> NaiveDateTime {
  dt.with_nanosecond(0).unwrap_or(dt)
}

/// Parses a deadline in one of the storage
/// layouts: `YYYY-MM-DDTHH:MM[:SS]`,
/// `YYYY-MM-DD HH:MM[:SS]`, a bare date, or
/// RFC 3339 (converted to local time).
pub fn parse_deadline(
  raw: &str
) -> Option<NaiveDateTime> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  for layout in DEADLINE_LAYOUTS {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, layout
      )
    {
      return Some(ndt);
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return date.and_hms_opt(0, 0, 0);
  }

  DateTime::parse_from_rfc3339(token)
    .ok()
    .map(|dt| {
      whole_seconds(
        dt.with_timezone(&Local)
          .naive_local()
      )
    })
}

/// Storage form of a deadline. Seconds are
/// only written when non-zero so values
/// coming from a minute-resolution picker
/// round-trip unchanged.
pub fn format_deadline(
  dt: &NaiveDateTime
) -> String {
  if dt.second() == 0 {
    dt.format("%Y-%m-%dT%H:%M")
      .to_string()
  } else {
    dt.format("%Y-%m-%dT%H:%M:%S")
      .to_string()
  }
}

/// Formats with `layout`, falling back to
/// the default layout when `layout` cannot
/// render a zone-less value.
pub fn format_display(
  dt: &NaiveDateTime,
  layout: &str
) -> String {
  let mut out = String::new();
  if is_valid_layout(layout)
    && write!(out, "{}", dt.format(layout))
      .is_ok()
  {
    return out;
  }
  dt.format(DEFAULT_DISPLAY_FORMAT)
    .to_string()
}

pub fn is_valid_layout(
  layout: &str
) -> bool {
  !StrftimeItems::new(layout)
    .any(|item| matches!(item, Item::Error))
}

/// Fractional minutes from `now` until
/// `deadline`; negative once it has passed.
pub fn minutes_until(
  deadline: NaiveDateTime,
  now: NaiveDateTime
) -> f64 {
  let delta = deadline - now;
  delta.num_milliseconds() as f64
    / 60_000.0
}

/// Resolves a user-typed deadline
/// expression relative to `now`.
#[tracing::instrument(skip(now))]
pub fn parse_date_expr(
  input: &str,
  now: NaiveDateTime
) -> anyhow::Result<NaiveDateTime> {
  let now = whole_seconds(now);
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return midnight(now.date());
    }
    | "tomorrow" => {
      return midnight(now.date())?
        .checked_add_signed(
          Duration::days(1)
        )
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return midnight(
      next_weekday_date(
        now.date(),
        target
      )
    );
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let mut day = now.date();
    let candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if candidate <= now {
      day = day
        .checked_add_signed(
          Duration::days(1)
        )
        .ok_or_else(|| {
          anyhow!(
            "failed to advance to \
             next day"
          )
        })?;
    }
    return day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct next \
           clock time candidate"
        )
      });
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[wdhm])$")
    .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => Duration::try_weeks(num),
      | Some("d") => Duration::try_days(num),
      | Some("h") => Duration::try_hours(num),
      | Some("m") => {
        Duration::try_minutes(num)
      }
      | other => {
        return Err(anyhow!(
          "unknown relative unit: \
           {other:?}"
        ));
      }
    }
    .ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    })?;

    let negative = caps
      .name("sign")
      .is_some_and(|m| m.as_str() == "-");
    let shifted = if negative {
      now.checked_sub_signed(duration)
    } else {
      now.checked_add_signed(duration)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    });
  }

  if let Some(ndt) =
    parse_deadline(token)
  {
    return Ok(ndt);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow, weekday names \
     (e.g. monday), clock times (e.g. \
     3:30pm or 15:30), +Nw/+Nd/+Nh/+Nm, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM, RFC3339"
  })
}

fn midnight(
  date: NaiveDate
) -> anyhow::Result<NaiveDateTime> {
  date.and_hms_opt(0, 0, 0).ok_or_else(
    || {
      anyhow!(
        "failed to construct midnight \
         for {date}"
      )
    }
  )
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  // A bare number is a clock time only
  // with an am/pm suffix ("3pm").
  if captures.name("minute").is_none()
    && captures.name("ampm").is_none()
  {
    return None;
  }

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = match captures
    .name("minute")
  {
    | Some(m) => {
      m.as_str().parse::<u32>().ok()?
    }
    | None => 0
  };
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

pub mod deadline_serde {
  use chrono::NaiveDateTime;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &Option<NaiveDateTime>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match dt {
      | Some(value) => serializer
        .serialize_str(
          &super::format_deadline(value)
        ),
      | None => serializer.serialize_none()
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<
    Option<NaiveDateTime>,
    D::Error
  >
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    match opt {
      | None => Ok(None),
      | Some(raw) if raw.trim().is_empty() => Ok(None),
      | Some(raw) => super::parse_deadline(&raw)
        .map(Some)
        .ok_or_else(|| {
          serde::de::Error::custom(
            format!(
              "invalid deadline: {raw}"
            )
          )
        })
    }
  }
}

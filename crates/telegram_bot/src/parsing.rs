use chrono::NaiveDate;
use engine::Money;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Help,
    Cancel,
    Income { text: Option<String> },
    Transfer,
    Debt,
    PayDebt,
    Balance,
    Debts,
    SetBalance,
    AddMethod,
    Reset,
    Report { args: Option<String> },
    ConnectSheet { args: Option<String> },
    DisconnectSheet,
    Unknown,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ParseError {
    #[error("invalid amount")]
    InvalidAmount,
    #[error("the amount must be greater than zero")]
    NotPositive,
    #[error("expected `<description> <amount>`")]
    MissingDescription,
    #[error("expected `/connectsheet <document-id> <credential>`")]
    MissingArguments,
    #[error("empty text")]
    Empty,
    #[error("dates look like 2025-06-30")]
    InvalidDate,
    #[error("the end date is before the start date")]
    EndBeforeStart,
    #[error("a report covers at most 366 days")]
    RangeTooLong,
}

pub(crate) const MAX_REPORT_DAYS: i64 = 366;

/// Period covered by `/report`. Custom ranges include both dates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReportRange {
    Today,
    /// Monday to Sunday.
    Week,
    Month,
    Custom { from: NaiveDate, to: NaiveDate },
}

impl ReportRange {
    /// Preset named by a keyword or a report button.
    pub(crate) fn preset(name: &str) -> Option<Self> {
        match name {
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `/cmd[@botname] [args]`; `None` when the text is not a command.
pub(crate) fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let cmd = head.split('@').next().unwrap_or(head).to_lowercase();
    let arg = parts
        .next()
        .map(collapse_whitespace)
        .filter(|a| !a.is_empty());

    Some(match cmd.as_str() {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/cancel" => Command::Cancel,
        "/income" => Command::Income { text: arg },
        "/transfer" => Command::Transfer,
        "/debt" => Command::Debt,
        "/paydebt" => Command::PayDebt,
        "/balance" => Command::Balance,
        "/debts" => Command::Debts,
        "/setbalance" => Command::SetBalance,
        "/addmethod" => Command::AddMethod,
        "/reset" => Command::Reset,
        "/report" => Command::Report { args: arg },
        "/connectsheet" => Command::ConnectSheet { args: arg },
        "/disconnectsheet" => Command::DisconnectSheet,
        _ => Command::Unknown,
    })
}

/// Strictly positive amount (`15000`, `15.000`, `15k`, `1,5jt`).
pub(crate) fn parse_amount(input: &str) -> Result<Money, ParseError> {
    let amount = parse_non_negative(input)?;
    if amount.is_zero() {
        return Err(ParseError::NotPositive);
    }
    Ok(amount)
}

/// Like [`parse_amount`] but accepts zero, for transfer fees.
pub(crate) fn parse_non_negative(input: &str) -> Result<Money, ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    let amount: Money = trimmed.parse().map_err(|_| ParseError::InvalidAmount)?;
    if amount.is_negative() {
        return Err(ParseError::NotPositive);
    }
    Ok(amount)
}

/// `"<description> <amount>"`, amount last.
pub(crate) fn parse_item(input: &str) -> Result<(String, Money), ParseError> {
    let text = collapse_whitespace(input);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let Some((description, amount)) = text.rsplit_once(' ') else {
        return Err(ParseError::MissingDescription);
    };
    Ok((description.to_string(), parse_amount(amount)?))
}

/// Arguments of `/connectsheet`: document id and credential.
pub(crate) fn parse_connect_args(args: Option<&str>) -> Result<(String, String), ParseError> {
    let mut parts = args.unwrap_or("").split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(document), Some(credential), None) => {
            Ok((document.to_string(), credential.to_string()))
        }
        _ => Err(ParseError::MissingArguments),
    }
}

/// Arguments of `/report`: a preset keyword or two dates. `None` when no
/// argument was given.
pub(crate) fn parse_report_args(args: Option<&str>) -> Result<Option<ReportRange>, ParseError> {
    let parts: Vec<&str> = args.unwrap_or("").split_whitespace().collect();
    match parts.as_slice() {
        [] => Ok(None),
        [name] => ReportRange::preset(&name.to_lowercase())
            .map(Some)
            .ok_or(ParseError::InvalidDate),
        [from, to] => {
            let parse = |s: &str| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ParseError::InvalidDate)
            };
            let (from, to) = (parse(from)?, parse(to)?);
            if to < from {
                return Err(ParseError::EndBeforeStart);
            }
            if (to - from).num_days() >= MAX_REPORT_DAYS {
                return Err(ParseError::RangeTooLong);
            }
            Ok(Some(ReportRange::Custom { from, to }))
        }
        _ => Err(ParseError::InvalidDate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_bot_suffix_and_args() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/Balance@dompet_bot"), Some(Command::Balance));
        assert_eq!(
            parse_command("/income  gaji   5jt "),
            Some(Command::Income {
                text: Some("gaji 5jt".to_string())
            })
        );
        assert_eq!(parse_command("/income"), Some(Command::Income { text: None }));
        assert_eq!(parse_command("/nope"), Some(Command::Unknown));
        assert_eq!(parse_command("nasi goreng 15k"), None);
    }

    #[test]
    fn amounts() {
        assert_eq!(parse_amount("15k"), Ok(Money::new(15_000)));
        assert_eq!(parse_amount(" 50.000 "), Ok(Money::new(50_000)));
        assert_eq!(parse_amount("0"), Err(ParseError::NotPositive));
        assert_eq!(parse_amount("abc"), Err(ParseError::InvalidAmount));
        assert_eq!(parse_amount(""), Err(ParseError::Empty));
        assert_eq!(parse_non_negative("0"), Ok(Money::ZERO));
        assert_eq!(parse_non_negative("2.500"), Ok(Money::new(2_500)));
    }

    #[test]
    fn items_need_description_and_amount() {
        assert_eq!(
            parse_item("  makan   siang 35rb"),
            Ok(("makan siang".to_string(), Money::new(35_000)))
        );
        assert_eq!(parse_item("35rb"), Err(ParseError::MissingDescription));
        assert_eq!(parse_item("makan siang"), Err(ParseError::InvalidAmount));
    }

    #[test]
    fn connect_arguments() {
        assert_eq!(
            parse_connect_args(Some("doc-1 refresh-xyz")),
            Ok(("doc-1".to_string(), "refresh-xyz".to_string()))
        );
        assert_eq!(
            parse_connect_args(Some("doc-1")),
            Err(ParseError::MissingArguments)
        );
        assert_eq!(parse_connect_args(None), Err(ParseError::MissingArguments));
    }

    #[test]
    fn report_arguments() {
        assert_eq!(parse_report_args(None), Ok(None));
        assert_eq!(parse_report_args(Some("Week")), Ok(Some(ReportRange::Week)));
        assert_eq!(parse_report_args(Some("today")), Ok(Some(ReportRange::Today)));
        let june = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();
        assert_eq!(
            parse_report_args(Some("2025-06-01 2025-06-30")),
            Ok(Some(ReportRange::Custom {
                from: june(1),
                to: june(30)
            }))
        );
        assert_eq!(
            parse_report_args(Some("2025-06-30 2025-06-01")),
            Err(ParseError::EndBeforeStart)
        );
        assert_eq!(
            parse_report_args(Some("2024-01-01 2025-06-01")),
            Err(ParseError::RangeTooLong)
        );
        assert_eq!(
            parse_report_args(Some("yesterday")),
            Err(ParseError::InvalidDate)
        );
        assert_eq!(
            parse_report_args(Some("2025-13-01 2025-06-01")),
            Err(ParseError::InvalidDate)
        );
        assert_eq!(
            parse_command("/report 2025-06-01 2025-06-30"),
            Some(Command::Report {
                args: Some("2025-06-01 2025-06-30".to_string())
            })
        );
    }
}

use objbridge_remote::Value;

use crate::cmd::{open, CallArgs};
use crate::exit::{remote_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let call_args = parse_args(&args.args)?;
    let (_client, handle) = open(&args.target).await?;

    tracing::debug!(name = %args.target.name, method = %args.method, "calling");
    let value = handle
        .call(&args.method, call_args)
        .await
        .map_err(|err| remote_error("call failed", err))?
        .settle()
        .await
        .map_err(|err| CliError::new(FAILURE, format!("call failed: {err}")))?;
    print_value(&value, format);
    Ok(SUCCESS)
}

fn parse_args(raw: &str) -> CliResult<Vec<Value>> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => Ok(items.into_iter().map(Value::from_json).collect()),
        Ok(other) => Err(CliError::new(
            USAGE,
            format!("--args must be a JSON array, got {other}"),
        )),
        Err(err) => Err(CliError::new(USAGE, format!("--args is not valid JSON: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_accepts_arrays() {
        let args = parse_args(r#"[42, "x", null]"#).unwrap();
        assert_eq!(args, vec![Value::from(42), Value::from("x"), Value::Null]);
        assert!(parse_args("[]").unwrap().is_empty());
    }

    #[test]
    fn parse_args_rejects_other_json() {
        assert_eq!(parse_args("{}").unwrap_err().code, USAGE);
        assert_eq!(parse_args("[1,").unwrap_err().code, USAGE);
    }
}

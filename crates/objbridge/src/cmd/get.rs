use crate::cmd::{open, GetArgs};
use crate::exit::{remote_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub async fn run(args: GetArgs, format: OutputFormat) -> CliResult<i32> {
    let (_client, handle) = open(&args.target).await?;
    let value = handle
        .get(&args.member)
        .await
        .map_err(|err| remote_error("get failed", err))?
        .settle()
        .await
        .map_err(|err| CliError::new(FAILURE, format!("get failed: {err}")))?;
    print_value(&value, format);
    Ok(SUCCESS)
}

use crate::cmd::{open, InspectArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_members, OutputFormat};

pub async fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let (_client, handle) = open(&args.target).await?;
    print_members(&args.target.name, &handle, format);
    Ok(SUCCESS)
}

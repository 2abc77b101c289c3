use alloy::primitives::Address;
use anyhow::Context;
use colored::Colorize;
use perp_deploy::{component::Component, deployer::Deployer, inspect};
use tabled::{builder::Builder, settings::Style};

use crate::Chain;

pub(crate) async fn render(deployer: &Deployer<Chain>, contract: Option<Address>, roles: &[String]) -> anyhow::Result<()> {
    println!("{}\n", format!("{:#^100}", " Deployment Inspection ").bold().purple());

    let report = inspect::reconcile(deployer).await.context("reconciling records")?;
    if let Some(block) = deployer.env().store().earliest_block() {
        println!("Deployment started at block {block}");
    }
    println!("{report}\n");

    if deployer.env().store().find(Component::PoolCreator.name()).is_some() {
        let facts = inspect::inspect_pool_creator(deployer).await.context("inspecting pool creator")?;
        println!("{facts}\n");
    }
    if deployer.env().store().find(Component::SymbolService.name()).is_some() {
        let facts = inspect::inspect_symbol_service(deployer).await.context("inspecting symbol service")?;
        println!("{facts}\n");
    }

    if let Some(contract) = contract {
        let mut builder = Builder::default();
        builder.push_record(["Role", "Members"]);
        for role in roles {
            let members = inspect::role_members(deployer.client(), contract, inspect::role_id(role))
                .await
                .with_context(|| format!("listing {role} members"))?;
            let members = members.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
            builder.push_record([role.as_str(), members.as_str()]);
        }
        let mut table = builder.build();
        table.with(Style::sharp());
        println!("{} {}", "Roles of".blue(), contract);
        println!("{table}");
    }

    if !report.is_consistent() {
        println!("{}", "Records drifted from the chain, see warnings above".yellow());
    }
    Ok(())
}

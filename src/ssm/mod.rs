//! Interactions with AWS Systems Manager: hybrid activations, managed-instance registration and
//! the Run Command channel used to execute shell commands on test instances.
pub mod activation;
pub mod command;
pub mod instance;

/// Name of the activation created for each SSM hybrid node.
pub const SSM_ACTIVATION_NAME: &str = "eks-hybrid-ssm-provider";

/*
[INPUT]:  Operator input via terminal
[OUTPUT]: Interactive wallet adapter for the `login` command
[POS]:    CLI interaction layer
[UPDATE]: When adding interactive adapters or prompts
*/

pub mod manual_wallet;

pub use manual_wallet::ManualWallet;

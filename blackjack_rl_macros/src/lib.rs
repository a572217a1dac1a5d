use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::ToTokens;
use syn::{parse_macro_input, punctuated::Punctuated, Ident, ImplItemFn, Token};

/// This macro is added before a method of the `Environment` struct in the impl block.
/// Use this macro to first check if the current episode phase is one of the phases
/// in the attribute.
///
/// For example, `#[allowed_phase(PlayerTurn)]` will make a method first check
/// if the current episode phase is `PlayerTurn`. If not, the method will return
/// `BlackjackError::IllegalAction` naming the method and the actual phase. Several
/// phases may be listed, separated by commas.
///
/// The guarded method must return `crate::Result<_>` and the impl block must have
/// `EpisodePhase` in scope.
#[proc_macro_attribute]
pub fn allowed_phase(attr: TokenStream, item: TokenStream) -> TokenStream {
    let phases = parse_macro_input!(attr with Punctuated::<Ident, Token![,]>::parse_terminated);
    let mut method = parse_macro_input!(item as ImplItemFn);
    if phases.is_empty() {
        return syn::Error::new(Span::call_site(), "allowed_phase needs at least one phase")
            .to_compile_error()
            .into();
    }

    let operation = method.sig.ident.to_string();
    let phases = phases.iter();
    let early_return: syn::Stmt = syn::parse_quote! {
        if !matches!(self.phase, #(EpisodePhase::#phases)|*) {
            return Err(crate::BlackjackError::IllegalAction {
                operation: #operation,
                phase: self.phase,
            });
        }
    };
    method.block.stmts.insert(0, early_return);
    method.into_token_stream().into()
}

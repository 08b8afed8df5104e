use crate::utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::spanned::Spanned;
use syn::{Item, LitStr, Result, parse_macro_input};

/// #[registrable(key = "...")] 宏实现
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = RegistrableArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let Some(key) = args.key else {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "expected #[registrable(key = \"...\")]",
        )
        .to_compile_error()
        .into();
    };

    let mut input = parse_macro_input!(item as Item);
    let (ident, generics, attrs) = match &mut input {
        Item::Struct(s) => (s.ident.clone(), s.generics.clone(), &mut s.attrs),
        Item::Enum(e) => (e.ident.clone(), e.generics.clone(), &mut e.attrs),
        other => {
            return syn::Error::new(other.span(), "#[registrable] only on struct or enum")
                .to_compile_error()
                .into();
        }
    };
    apply_derives(
        attrs,
        vec![
            syn::parse_quote!(Clone),
            syn::parse_quote!(serde::Serialize),
            syn::parse_quote!(serde::Deserialize),
        ],
    );

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let expanded = quote! {
        #input

        impl #impl_generics #ident #ty_generics #where_clause {
            /// 注册表中的键
            pub const KEY: &'static str = #key;
        }

        impl #impl_generics ::eda_messaging::registry::Registrable for #ident #ty_generics #where_clause {
            fn key(&self) -> &str {
                #key
            }
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct RegistrableArgs {
    key: Option<LitStr>,
}

impl RegistrableArgs {
    fn parse(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if !meta.path.is_ident("key") {
            return Err(meta.error("expected `key`"));
        }
        if self.key.is_some() {
            return Err(meta.error("duplicate `key`"));
        }
        let key: LitStr = meta.value()?.parse()?;
        if key.value().trim().is_empty() {
            return Err(syn::Error::new(key.span(), "registry key must not be empty"));
        }
        self.key = Some(key);
        Ok(())
    }
}
